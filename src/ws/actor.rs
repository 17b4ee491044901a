use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::hub::{BroadcastHub, HubEvent, HubMessage};
use crate::auth::auth::{authorize, Action};
use crate::config::ActorSettings;
use crate::error::CollabError;
use crate::models::{Document, DocumentSave, Operation, OperationKind, OperationRequest, Role, SaveRequest, ServerMessage};
use crate::services::persistence::PersistenceAdapter;

/// Who is asking the actor to do something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub user_id: String,
    pub session_id: Uuid,
    pub role: Role,
}

enum ActorCommand {
    Apply {
        request: OperationRequest,
        author: Author,
        reply: oneshot::Sender<Result<Operation, CollabError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Document>,
    },
    Attach {
        reply: oneshot::Sender<(Document, broadcast::Receiver<HubEvent>)>,
    },
    Checkpoint {
        request: SaveRequest,
        author: Author,
        reply: oneshot::Sender<Result<Document, CollabError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<(), CollabError>>,
    },
}

/// Cloneable address of a running document actor.
#[derive(Clone)]
pub struct DocumentHandle {
    document_id: Uuid,
    commands: mpsc::Sender<ActorCommand>,
}

impl DocumentHandle {
    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    /// Apply one edit. Edits from all sessions are serialized in arrival order.
    pub async fn apply(&self, request: OperationRequest, author: Author) -> Result<Operation, CollabError> {
        self.call(|reply| ActorCommand::Apply { request, author, reply }).await?
    }

    /// Current live state.
    pub async fn snapshot(&self) -> Result<Document, CollabError> {
        self.call(|reply| ActorCommand::Snapshot { reply }).await
    }

    /// Snapshot plus a hub subscription taken at the same point in the operation stream,
    /// so the subscriber sees exactly the operations after the snapshot.
    pub async fn attach(&self) -> Result<(Document, broadcast::Receiver<HubEvent>), CollabError> {
        self.call(|reply| ActorCommand::Attach { reply }).await
    }

    /// Persist the live state, taking only `title` and `is_public` from the request.
    pub async fn checkpoint(&self, request: SaveRequest, author: Author) -> Result<Document, CollabError> {
        self.call(|reply| ActorCommand::Checkpoint { request, author, reply }).await?
    }

    /// Flush dirty state and stop the actor.
    ///
    /// When the final save fails the actor keeps running with its live state and the error is
    /// returned. An actor that is already gone has nothing left to flush.
    pub async fn shutdown(&self) -> Result<(), CollabError> {
        match self.call(|reply| ActorCommand::Shutdown { reply }).await {
            Ok(flushed) => flushed,
            Err(_) => Ok(()),
        }
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ActorCommand) -> Result<T, CollabError> {
        let (reply, response) = oneshot::channel();
        let closed = || CollabError::DocumentClosed(self.document_id.to_string());
        self.commands.send(command(reply)).await.map_err(|_| closed())?;
        response.await.map_err(|_| closed())
    }
}

/// Exclusive owner of one open document's content and version.
pub struct DocumentActor {
    doc: Document,
    persisted_version: i64,
    persistence: Arc<PersistenceAdapter>,
    hub: BroadcastHub,
    settings: ActorSettings,
}

impl DocumentActor {
    /// Start an actor for a loaded document and return its handle.
    pub fn spawn(
        doc: Document,
        persistence: Arc<PersistenceAdapter>,
        hub: BroadcastHub,
        settings: ActorSettings,
    ) -> DocumentHandle {
        let (commands, inbox) = mpsc::channel(settings.command_capacity);
        let document_id = doc.id;
        let actor = DocumentActor {
            persisted_version: doc.version,
            doc,
            persistence,
            hub,
            settings,
        };
        tokio::spawn(actor.run(inbox));
        DocumentHandle { document_id, commands }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<ActorCommand>) {
        info!("Document actor started for {} at version {}", self.doc.id, self.doc.version);

        let mut autosave = self.settings.autosave_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let command = match autosave.as_mut() {
                Some(ticker) => tokio::select! {
                    command = inbox.recv() => command,
                    _ = ticker.tick() => {
                        let _ = self.persist_if_dirty("autosave").await;
                        continue;
                    }
                },
                None => inbox.recv().await,
            };

            match command {
                Some(ActorCommand::Apply { request, author, reply }) => {
                    let result = self.apply(request, &author);
                    if let Ok(op) = &result {
                        self.hub
                            .publish(Some(author.session_id), HubMessage::Server(ServerMessage::Operation(op.clone())));
                    }
                    let _ = reply.send(result);
                }
                Some(ActorCommand::Snapshot { reply }) => {
                    let _ = reply.send(self.doc.clone());
                }
                Some(ActorCommand::Attach { reply }) => {
                    let _ = reply.send((self.doc.clone(), self.hub.subscribe()));
                }
                Some(ActorCommand::Checkpoint { request, author, reply }) => {
                    let result = self.checkpoint(request, &author).await;
                    if let Ok(doc) = &result {
                        self.hub.publish(None, HubMessage::DocumentRefresh(doc.clone()));
                    }
                    let _ = reply.send(result);
                }
                Some(ActorCommand::Shutdown { reply }) => {
                    let flushed = self.persist_if_dirty("shutdown").await;
                    let stop = flushed.is_ok();
                    let _ = reply.send(flushed);
                    if stop {
                        break;
                    }
                }
                None => {
                    let _ = self.persist_if_dirty("shutdown").await;
                    break;
                }
            }
        }

        info!("Document actor stopped for {} at version {}", self.doc.id, self.doc.version);
    }

    fn apply(&mut self, request: OperationRequest, author: &Author) -> Result<Operation, CollabError> {
        authorize(author.role, Action::Edit)?;
        let kind: OperationKind = request.kind.parse()?;

        if request.position < 0 {
            return Err(CollabError::InvalidOperation(format!("Negative position {}", request.position)));
        }
        let position = request.position as usize;
        let len = self.doc.char_len();
        if position > len {
            return Err(CollabError::InvalidOperation(format!(
                "Position {} exceeds content length {}",
                position, len
            )));
        }

        let (removed, inserted) = match kind {
            OperationKind::Insert => ("", request.content.as_str()),
            OperationKind::Delete => (request.content.as_str(), ""),
            OperationKind::Replace => (request.old_content.as_deref().unwrap_or(""), request.content.as_str()),
        };
        if removed.is_empty() && inserted.is_empty() {
            return Err(CollabError::InvalidOperation(format!("Empty {} operation", kind)));
        }

        let start = byte_offset(&self.doc.content, position);
        if !self.doc.content[start..].starts_with(removed) {
            return Err(CollabError::Conflict(format!(
                "Content at position {} no longer matches the expected text (document is at version {})",
                position, self.doc.version
            )));
        }
        self.doc.content.replace_range(start..start + removed.len(), inserted);
        let old_content = (kind == OperationKind::Replace).then(|| removed.to_string());

        let now = Utc::now();
        self.doc.version += 1;
        self.doc.updated_at = now;
        self.doc.last_editor = Some(author.user_id.clone());

        debug!(
            "Applied {} at {} on document {} by {}, now version {}",
            kind, position, self.doc.id, author.user_id, self.doc.version
        );

        Ok(Operation {
            id: Uuid::new_v4(),
            document_id: self.doc.id,
            user_id: author.user_id.clone(),
            kind,
            position: request.position,
            content: request.content,
            old_content,
            version: self.doc.version,
            timestamp: now,
        })
    }

    async fn checkpoint(&mut self, request: SaveRequest, author: &Author) -> Result<Document, CollabError> {
        authorize(author.role, Action::Save)?;

        if let Some(content) = &request.content {
            if *content != self.doc.content {
                warn!(
                    "Save from {} on document {} carried stale content; persisting live version {} instead",
                    author.user_id, self.doc.id, self.doc.version
                );
            }
        }

        let title = request.title.unwrap_or_else(|| self.doc.title.clone());
        let is_public = request.is_public.unwrap_or(self.doc.is_public);
        self.persist(title, is_public).await?;
        info!("Document {} checkpointed by {} at version {}", self.doc.id, author.user_id, self.doc.version);
        Ok(self.doc.clone())
    }

    async fn persist_if_dirty(&mut self, reason: &str) -> Result<(), CollabError> {
        if self.doc.version == self.persisted_version {
            return Ok(());
        }
        let (title, is_public) = (self.doc.title.clone(), self.doc.is_public);
        match self.persist(title, is_public).await {
            Ok(()) => {
                info!("Document {} persisted on {} at version {}", self.doc.id, reason, self.doc.version);
                Ok(())
            }
            Err(e) => {
                error!("Failed to persist document {} on {}: {}", self.doc.id, reason, e);
                Err(e)
            }
        }
    }

    /// Write the live content. Title and visibility only change in memory once storage accepted them.
    async fn persist(&mut self, title: String, is_public: bool) -> Result<(), CollabError> {
        let save = DocumentSave {
            id: self.doc.id,
            title,
            content: self.doc.content.clone(),
            is_public,
            version: self.doc.version,
            expected_version: self.persisted_version,
            last_editor: self.doc.last_editor.clone(),
        };
        let stored = self.persistence.save(&save).await?;
        self.persisted_version = stored;
        self.doc.title = save.title;
        self.doc.is_public = save.is_public;
        self.doc.updated_at = Utc::now();
        Ok(())
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(text.len())
}
