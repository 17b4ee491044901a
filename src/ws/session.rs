use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tracing::{debug, info, warn};

use super::actor::{Author, DocumentHandle};
use super::gate::Admission;
use super::hub::{HubEvent, HubMessage};
use super::liveness::{LivenessMonitor, Probe};
use super::registry::{Registration, SessionKey, SessionRegistry};
use crate::auth::auth::{authorize, Action};
use crate::config::LivenessSettings;
use crate::error::CollabError;
use crate::models::{ClientMessage, Document, Role, ServerMessage};
use crate::utils::ScopeGuard;

/// One decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Message(ClientMessage),
    /// A frame that could not be decoded. Reported to the client, the session continues.
    Malformed(CollabError),
    /// Transport-level keep-alive traffic.
    Heartbeat,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client went away.
    Closed,
    /// No activity within the liveness timeout, or the client stopped reading for that long.
    Evicted,
    /// The outbound writer stopped.
    OutboxClosed,
}

/// Drive one admitted connection until it ends.
///
/// `inbound` is the decoded client stream. Everything for the client goes to `outbox`, in the
/// order produced here. Document updates and pings never wait on a full outbox: they are
/// dropped and the client is told to resynchronize. Replies to the client's own requests wait
/// at most the liveness timeout. The session is registered for exactly the duration of this
/// call, including when the future is dropped early.
pub async fn run_session<S>(
    registry: Arc<SessionRegistry>,
    admission: Admission,
    settings: LivenessSettings,
    mut inbound: S,
    outbox: mpsc::Sender<ServerMessage>,
) -> Result<SessionEnd, CollabError>
where
    S: Stream<Item = Inbound> + Unpin,
{
    let Registration {
        key,
        room,
        snapshot,
        mut events,
    } = registry
        .register(admission.document_id, &admission.user_id, admission.role)
        .await?;

    let guard = {
        let registry = registry.clone();
        ScopeGuard::new(move || {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    registry.unregister(&key).await;
                });
            }
        })
    };

    let mut session = Session {
        registry: registry.clone(),
        key,
        user_id: admission.user_id,
        role: admission.role,
        handle: room.handle().clone(),
        outbox,
        stall_timeout: settings.timeout,
        floor: snapshot.version,
        missed: 0,
    };
    let end = session.drive(snapshot, &mut inbound, &mut events, &settings).await;

    registry.unregister(&key).await;
    guard.disarm();
    info!(
        "Session {} of {} on document {} ended: {:?}",
        key.session_id, session.user_id, key.document_id, end
    );
    Ok(end)
}

struct Session {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    user_id: String,
    role: Role,
    handle: DocumentHandle,
    outbox: mpsc::Sender<ServerMessage>,
    stall_timeout: Duration,
    /// Operations at or below this version are already reflected in what the client holds.
    floor: i64,
    /// Updates dropped since the client was last told to resynchronize.
    missed: u64,
}

impl Session {
    async fn drive<S>(
        &mut self,
        snapshot: Document,
        inbound: &mut S,
        events: &mut broadcast::Receiver<HubEvent>,
        settings: &LivenessSettings,
    ) -> SessionEnd
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        if let Err(end) = self.reply(ServerMessage::document_state(snapshot, self.role)).await {
            return end;
        }
        let mut monitor = LivenessMonitor::new(settings);

        loop {
            let step = tokio::select! {
                frame = inbound.next() => match frame {
                    Some(frame) => self.on_inbound(frame).await,
                    None => return SessionEnd::Closed,
                },
                event = events.recv() => match event {
                    Ok(event) => self.on_event(event),
                    Err(RecvError::Lagged(missed)) => self.on_lagged(missed),
                    Err(RecvError::Closed) => return SessionEnd::Closed,
                },
                _ = monitor.tick() => match monitor.probe(self.registry.idle_for(&self.key).await) {
                    Probe::Ping(ping) => self
                        .notify_missed()
                        .and_then(|_| self.offer(ServerMessage::Ping(ping)))
                        .map(|_| ()),
                    Probe::Expired { idle } => {
                        info!("Evicting session {} after {:?} of inactivity", self.key.session_id, idle);
                        return SessionEnd::Evicted;
                    }
                },
            };
            if let Err(end) = step {
                return end;
            }
        }
    }

    async fn on_inbound(&mut self, frame: Inbound) -> Result<(), SessionEnd> {
        self.registry.touch(&self.key).await;
        match frame {
            Inbound::Heartbeat => Ok(()),
            Inbound::Malformed(e) => {
                warn!("Malformed frame from session {}: {}", self.key.session_id, e);
                self.reply(ServerMessage::error(&e)).await
            }
            Inbound::Message(msg) => match self.dispatch(msg).await {
                Ok(Some(reply)) => self.reply(reply).await,
                Ok(None) => Ok(()),
                Err(e) => {
                    debug!("Rejected message from session {}: {}", self.key.session_id, e);
                    self.reply(ServerMessage::error(&e)).await
                }
            },
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> Result<Option<ServerMessage>, CollabError> {
        authorize(self.role, Action::of(&msg))?;
        match msg {
            ClientMessage::Operation(request) => {
                self.handle.apply(request, self.author()).await?;
                Ok(None)
            }
            ClientMessage::CursorUpdate(cursor) => {
                if cursor.position < 0 {
                    return Err(CollabError::InvalidOperation(format!(
                        "Negative cursor position {}",
                        cursor.position
                    )));
                }
                self.registry.update_cursor(&self.key, cursor.position).await?;
                Ok(None)
            }
            ClientMessage::RequestDocumentState(_) => {
                let doc = self.handle.snapshot().await?;
                self.floor = doc.version;
                Ok(Some(ServerMessage::document_state(doc, self.role)))
            }
            ClientMessage::Save(request) => {
                // Everyone, this session included, gets the refreshed state through the hub.
                self.handle.checkpoint(request, self.author()).await?;
                Ok(None)
            }
            ClientMessage::Ping(ping) => Ok(Some(ServerMessage::Pong(ping))),
            ClientMessage::Pong(_) => Ok(None),
        }
    }

    fn on_event(&mut self, event: HubEvent) -> Result<(), SessionEnd> {
        if !event.is_for(self.key.session_id) {
            return Ok(());
        }
        let outgoing = match &*event.message {
            HubMessage::Server(ServerMessage::Operation(op)) if op.version <= self.floor => return Ok(()),
            HubMessage::Server(msg) => msg.clone(),
            HubMessage::DocumentRefresh(doc) => {
                if doc.version < self.floor {
                    return Ok(());
                }
                self.floor = doc.version;
                ServerMessage::document_state(doc.clone(), self.role)
            }
        };
        self.deliver(outgoing)
    }

    fn on_lagged(&mut self, missed: u64) -> Result<(), SessionEnd> {
        self.missed += missed;
        self.notify_missed().map(|_| ())
    }

    /// Queue a document update. A full outbox drops it and counts it as missed.
    fn deliver(&mut self, msg: ServerMessage) -> Result<(), SessionEnd> {
        if !(self.notify_missed()? && self.offer(msg)?) {
            self.missed += 1;
        }
        Ok(())
    }

    /// Tell the client how many updates it missed. Returns `true` once nothing is owed.
    fn notify_missed(&mut self) -> Result<bool, SessionEnd> {
        if self.missed == 0 {
            return Ok(true);
        }
        let err = CollabError::Conflict(format!(
            "Missed {} updates, request the document state to resynchronize",
            self.missed
        ));
        if !self.offer(ServerMessage::error(&err))? {
            return Ok(false);
        }
        warn!("Session {} fell behind by {} updates", self.key.session_id, self.missed);
        self.missed = 0;
        Ok(true)
    }

    /// Queue without waiting. Returns `false` when the outbox is full.
    fn offer(&self, msg: ServerMessage) -> Result<bool, SessionEnd> {
        match self.outbox.try_send(msg) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(SessionEnd::OutboxClosed),
        }
    }

    /// Queue a reply to the client's own request, waiting for room no longer than the liveness timeout.
    async fn reply(&self, msg: ServerMessage) -> Result<(), SessionEnd> {
        match self.outbox.send_timeout(msg, self.stall_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                info!(
                    "Evicting session {}, its client has not read for {:?}",
                    self.key.session_id, self.stall_timeout
                );
                Err(SessionEnd::Evicted)
            }
            Err(SendTimeoutError::Closed(_)) => Err(SessionEnd::OutboxClosed),
        }
    }

    fn author(&self) -> Author {
        Author {
            user_id: self.user_id.clone(),
            session_id: self.key.session_id,
            role: self.role,
        }
    }
}
