use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, OnceCell, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actor::{DocumentActor, DocumentHandle};
use super::hub::{BroadcastHub, HubEvent, HubMessage};
use crate::config::ActorSettings;
use crate::error::CollabError;
use crate::models::{
    ActiveSessionsMessage, CursorUpdateMessage, Document, PresenceMessage, Role, ServerMessage, SessionInfo,
};
use crate::services::persistence::PersistenceAdapter;

/// Identifies one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub document_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub cursor_position: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    last_seen: Instant,
}

impl SessionRecord {
    fn new(user_id: &str, role: Role) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            role,
            cursor_position: None,
            started_at: now,
            last_active: now,
            last_seen: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
        self.last_seen = Instant::now();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            role: self.role,
            cursor_position: self.cursor_position,
            started_at: self.started_at,
            last_active: self.last_active,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum RoomState {
    #[default]
    Open,
    /// The last session left and the actor is flushing. New sessions wait.
    Closing,
    /// Flushed and removed from the registry. New sessions open a fresh room.
    Retired,
}

#[derive(Default)]
struct RoomMembers {
    sessions: HashMap<Uuid, SessionRecord>,
    state: RoomState,
}

/// An open document: its actor, its hub and the sessions attached to it.
pub struct DocRoom {
    document_id: Uuid,
    handle: DocumentHandle,
    hub: BroadcastHub,
    members: RwLock<RoomMembers>,
    /// Signalled whenever a closing room settles, either retired or reopened.
    settled: watch::Sender<()>,
}

impl DocRoom {
    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn handle(&self) -> &DocumentHandle {
        &self.handle
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let members = self.members.read().await;
        let mut sessions: Vec<SessionInfo> = members.sessions.values().map(SessionRecord::info).collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Publish the current member list. The list is read and published under the same lock,
    /// so the last `active_sessions` on the hub always matches the membership.
    async fn announce(&self) {
        let members = self.members.read().await;
        let mut sessions: Vec<SessionInfo> = members.sessions.values().map(SessionRecord::info).collect();
        sessions.sort_by_key(|s| s.started_at);
        self.hub
            .publish(None, HubMessage::Server(ServerMessage::ActiveSessions(ActiveSessionsMessage { sessions })));
    }

    async fn settle(&self, state: RoomState) {
        self.members.write().await.state = state;
        self.settled.send_replace(());
    }
}

/// What a session gets back from a successful registration.
pub struct Registration {
    pub key: SessionKey,
    pub room: Arc<DocRoom>,
    /// Live state at the moment `events` was subscribed.
    pub snapshot: Document,
    pub events: broadcast::Receiver<HubEvent>,
}

/// Tracks open documents and their live sessions.
///
/// Each document id maps to at most one room. The room is created by the first registration,
/// which loads the document and starts its actor, and retired when its last session leaves.
pub struct SessionRegistry {
    rooms: Mutex<HashMap<Uuid, Arc<OnceCell<Arc<DocRoom>>>>>,
    persistence: Arc<PersistenceAdapter>,
    actor_settings: ActorSettings,
}

impl SessionRegistry {
    pub fn new(persistence: Arc<PersistenceAdapter>, actor_settings: ActorSettings) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            persistence,
            actor_settings,
        }
    }

    /// Add a session to a document, opening the document if needed.
    pub async fn register(&self, document_id: Uuid, user_id: &str, role: Role) -> Result<Registration, CollabError> {
        loop {
            let cell = {
                let mut rooms = self.rooms.lock().await;
                rooms.entry(document_id).or_default().clone()
            };

            let room = match cell.get_or_try_init(|| self.open_room(document_id)).await {
                Ok(room) => room.clone(),
                Err(e) => {
                    self.discard_unopened(document_id, &cell).await;
                    return Err(e);
                }
            };

            let record = SessionRecord::new(user_id, role);
            let key = SessionKey {
                document_id,
                session_id: record.session_id,
            };
            {
                let mut members = room.members.write().await;
                match members.state {
                    RoomState::Open => {
                        members.sessions.insert(key.session_id, record);
                    }
                    RoomState::Closing => {
                        // Subscribed under the lock, so the settle that follows cannot be missed.
                        let mut settled = room.settled.subscribe();
                        drop(members);
                        debug!("Document {} is closing, waiting before reopening", document_id);
                        let _ = settled.changed().await;
                        continue;
                    }
                    RoomState::Retired => continue,
                }
            }

            let (snapshot, events) = match room.handle.attach().await {
                Ok(attached) => attached,
                Err(e) => {
                    self.unregister(&key).await;
                    return Err(e);
                }
            };

            room.hub.publish(
                Some(key.session_id),
                HubMessage::Server(ServerMessage::UserJoined(PresenceMessage {
                    user_id: user_id.to_string(),
                    session_id: key.session_id,
                })),
            );
            room.announce().await;

            info!(
                "Session {} joined document {} as {} ({})",
                key.session_id, document_id, user_id, role
            );
            return Ok(Registration {
                key,
                room,
                snapshot,
                events,
            });
        }
    }

    /// Remove a session. Safe to call more than once; only the first call has an effect.
    pub async fn unregister(&self, key: &SessionKey) -> Option<SessionRecord> {
        let room = self.room(key.document_id).await?;
        let (record, now_empty) = {
            let mut members = room.members.write().await;
            let record = members.sessions.remove(&key.session_id)?;
            let now_empty = members.sessions.is_empty();
            if now_empty {
                members.state = RoomState::Closing;
            }
            (record, now_empty)
        };

        room.hub.publish(
            Some(key.session_id),
            HubMessage::Server(ServerMessage::UserLeft(PresenceMessage {
                user_id: record.user_id.clone(),
                session_id: key.session_id,
            })),
        );
        info!("Session {} left document {}", key.session_id, key.document_id);

        if now_empty {
            self.retire(&room).await;
        } else {
            room.announce().await;
        }
        Some(record)
    }

    /// Sessions currently attached to a document. Empty when the document is not open.
    pub async fn list(&self, document_id: Uuid) -> Vec<SessionInfo> {
        match self.room(document_id).await {
            Some(room) => room.sessions().await,
            None => Vec::new(),
        }
    }

    /// Record client activity.
    pub async fn touch(&self, key: &SessionKey) -> bool {
        let Some(room) = self.room(key.document_id).await else {
            return false;
        };
        let mut members = room.members.write().await;
        match members.sessions.get_mut(&key.session_id) {
            Some(record) => {
                record.touch();
                true
            }
            None => false,
        }
    }

    /// Time since the session's last activity, or `None` if it is no longer registered.
    pub async fn idle_for(&self, key: &SessionKey) -> Option<Duration> {
        let room = self.room(key.document_id).await?;
        let members = room.members.read().await;
        members.sessions.get(&key.session_id).map(|r| r.last_seen.elapsed())
    }

    /// Store a cursor position and share it with the other sessions.
    pub async fn update_cursor(&self, key: &SessionKey, position: i64) -> Result<(), CollabError> {
        let room = self
            .room(key.document_id)
            .await
            .ok_or_else(|| CollabError::DocumentClosed(key.document_id.to_string()))?;
        let user_id = {
            let mut members = room.members.write().await;
            let record = members
                .sessions
                .get_mut(&key.session_id)
                .ok_or_else(|| CollabError::DocumentClosed(key.document_id.to_string()))?;
            record.cursor_position = Some(position);
            record.user_id.clone()
        };
        room.hub.publish(
            Some(key.session_id),
            HubMessage::Server(ServerMessage::CursorUpdate(CursorUpdateMessage {
                user_id,
                session_id: key.session_id,
                position,
            })),
        );
        Ok(())
    }

    /// The open room for a document, if any.
    pub async fn room(&self, document_id: Uuid) -> Option<Arc<DocRoom>> {
        let rooms = self.rooms.lock().await;
        rooms.get(&document_id).and_then(|cell| cell.get().cloned())
    }

    pub async fn open_documents(&self) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn session_count(&self) -> usize {
        let rooms: Vec<Arc<DocRoom>> = {
            let rooms = self.rooms.lock().await;
            rooms.values().filter_map(|cell| cell.get().cloned()).collect()
        };
        let mut count = 0;
        for room in rooms {
            count += room.members.read().await.sessions.len();
        }
        count
    }

    async fn open_room(&self, document_id: Uuid) -> Result<Arc<DocRoom>, CollabError> {
        let doc = self.persistence.load(document_id).await?;
        info!("Opening document {} at version {}", document_id, doc.version);
        let hub = BroadcastHub::new(document_id, self.actor_settings.broadcast_capacity);
        let handle = DocumentActor::spawn(doc, self.persistence.clone(), hub.clone(), self.actor_settings);
        let (settled, _) = watch::channel(());
        Ok(Arc::new(DocRoom {
            document_id,
            handle,
            hub,
            members: RwLock::new(RoomMembers::default()),
            settled,
        }))
    }

    /// Drop a map entry whose load failed, unless another registration is still using it.
    async fn discard_unopened(&self, document_id: Uuid, cell: &Arc<OnceCell<Arc<DocRoom>>>) {
        let mut rooms = self.rooms.lock().await;
        let unused = rooms
            .get(&document_id)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && Arc::strong_count(cell) == 2);
        if unused && !cell.initialized() {
            rooms.remove(&document_id);
        }
    }

    /// Stop the actor, flushing unsaved edits, then free the document id for a fresh load.
    ///
    /// If the final save fails the room stays open with its live actor, so the next session
    /// attaches to the unsaved state instead of reloading older content from storage.
    async fn retire(&self, room: &Arc<DocRoom>) {
        if let Err(e) = room.handle.shutdown().await {
            error!(
                "Keeping document {} open, its final save failed: {}",
                room.document_id, e
            );
            room.settle(RoomState::Open).await;
            return;
        }
        {
            let mut rooms = self.rooms.lock().await;
            let current = rooms
                .get(&room.document_id)
                .is_some_and(|cell| cell.get().is_some_and(|r| Arc::ptr_eq(r, room)));
            if current {
                rooms.remove(&room.document_id);
            } else {
                warn!("Retired document {} was no longer registered", room.document_id);
            }
        }
        room.settle(RoomState::Retired).await;
        info!("Closed document {}", room.document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::{DocumentStore, MemoryStore};
    use crate::models::OperationRequest;
    use crate::ws::actor::Author;
    use pretty_assertions::assert_eq;

    async fn registry_with(doc: Document) -> (Arc<MemoryStore>, SessionRegistry) {
        let store = Arc::new(MemoryStore::new());
        store.insert_document(doc).await;
        let persistence = Arc::new(PersistenceAdapter::new(
            store.clone(),
            RetryPolicy { attempts: 1, backoff: Duration::from_millis(1) },
        ));
        let settings = ActorSettings {
            autosave_interval: None,
            broadcast_capacity: 64,
            command_capacity: 16,
        };
        (store, SessionRegistry::new(persistence, settings))
    }

    fn drain(events: &mut broadcast::Receiver<HubEvent>, session_id: Uuid) -> Vec<ServerMessage> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if !event.is_for(session_id) {
                continue;
            }
            if let HubMessage::Server(msg) = &*event.message {
                seen.push(msg.clone());
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_register_opens_document_once() {
        let doc = Document::new(Uuid::new_v4(), "Notes", "alice").with_content("hi");
        let (_, registry) = registry_with(doc.clone()).await;

        let a = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        let b = registry.register(doc.id, "bob", Role::Editor).await.unwrap();
        assert!(Arc::ptr_eq(&a.room, &b.room));
        assert_eq!(a.snapshot.content, "hi");
        assert_eq!(registry.open_documents().await, 1);
        assert_eq!(registry.list(doc.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_document_is_not_kept_open() {
        let (_, registry) = registry_with(Document::new(Uuid::new_v4(), "Notes", "alice")).await;
        let missing = Uuid::new_v4();
        let result = registry.register(missing, "alice", Role::Owner).await;
        assert!(matches!(result, Err(CollabError::NotFound(_))));
        assert_eq!(registry.open_documents().await, 0);
        assert!(registry.rooms.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_and_leave_are_announced() {
        let doc = Document::new(Uuid::new_v4(), "Notes", "alice");
        let (_, registry) = registry_with(doc.clone()).await;

        let mut first = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        let second = registry.register(doc.id, "bob", Role::Viewer).await.unwrap();

        let seen = drain(&mut first.events, first.key.session_id);
        let joined = ServerMessage::UserJoined(PresenceMessage {
            user_id: "bob".to_string(),
            session_id: second.key.session_id,
        });
        assert!(seen.contains(&joined));
        match seen.last() {
            Some(ServerMessage::ActiveSessions(active)) => assert_eq!(active.sessions.len(), 2),
            other => panic!("expected active_sessions, got {:?}", other),
        }

        assert!(registry.unregister(&second.key).await.is_some());
        assert!(registry.unregister(&second.key).await.is_none());

        let seen = drain(&mut first.events, first.key.session_id);
        let left: Vec<_> = seen.iter().filter(|m| matches!(m, ServerMessage::UserLeft(_))).collect();
        assert_eq!(left.len(), 1);
        let listed = registry.list(doc.id).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_last_leave_flushes_and_reopens_from_storage() {
        let doc = Document::new(Uuid::new_v4(), "Notes", "alice").with_content("abc");
        let (store, registry) = registry_with(doc.clone()).await;

        let reg = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        let author = Author {
            user_id: "alice".to_string(),
            session_id: reg.key.session_id,
            role: Role::Owner,
        };
        let request = OperationRequest {
            kind: "insert".to_string(),
            position: 3,
            content: "d".to_string(),
            old_content: None,
        };
        reg.room.handle().apply(request, author).await.unwrap();
        registry.unregister(&reg.key).await;

        assert_eq!(registry.open_documents().await, 0);
        assert!(registry.list(doc.id).await.is_empty());
        assert_eq!(store.load_document(doc.id).await.unwrap().content, "abcd");

        let again = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        assert!(!Arc::ptr_eq(&again.room, &reg.room));
        assert_eq!(again.snapshot.content, "abcd");
        assert_eq!(again.snapshot.version, 2);
    }

    #[tokio::test]
    async fn test_failed_final_save_keeps_document_open() {
        let doc = Document::new(Uuid::new_v4(), "Notes", "alice").with_content("abc");
        let (store, registry) = registry_with(doc.clone()).await;

        let reg = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        let author = Author {
            user_id: "alice".to_string(),
            session_id: reg.key.session_id,
            role: Role::Owner,
        };
        let request = OperationRequest {
            kind: "insert".to_string(),
            position: 0,
            content: "x".to_string(),
            old_content: None,
        };
        reg.room.handle().apply(request, author).await.unwrap();
        store.inject_transient_save_failures(1);
        registry.unregister(&reg.key).await;

        assert_eq!(registry.open_documents().await, 1);
        assert_eq!(store.load_document(doc.id).await.unwrap().content, "abc");

        let again = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        assert!(Arc::ptr_eq(&again.room, &reg.room));
        assert_eq!((again.snapshot.content.as_str(), again.snapshot.version), ("xabc", 2));

        registry.unregister(&again.key).await;
        assert_eq!(registry.open_documents().await, 0);
        assert_eq!(store.load_document(doc.id).await.unwrap().content, "xabc");
    }

    #[tokio::test]
    async fn test_cursor_update_reaches_others() {
        let doc = Document::new(Uuid::new_v4(), "Notes", "alice");
        let (_, registry) = registry_with(doc.clone()).await;
        let a = registry.register(doc.id, "alice", Role::Owner).await.unwrap();
        let mut b = registry.register(doc.id, "bob", Role::Editor).await.unwrap();
        drain(&mut b.events, b.key.session_id);

        registry.update_cursor(&a.key, 7).await.unwrap();
        let seen = drain(&mut b.events, b.key.session_id);
        assert_eq!(
            seen,
            vec![ServerMessage::CursorUpdate(CursorUpdateMessage {
                user_id: "alice".to_string(),
                session_id: a.key.session_id,
                position: 7,
            })]
        );
        let listed = registry.list(doc.id).await;
        let alice = listed.iter().find(|s| s.session_id == a.key.session_id).unwrap();
        assert_eq!(alice.cursor_position, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_time() {
        let doc = Document::new(Uuid::new_v4(), "Notes", "alice");
        let (_, registry) = registry_with(doc.clone()).await;
        let reg = registry.register(doc.id, "alice", Role::Owner).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(registry.idle_for(&reg.key).await.unwrap() >= Duration::from_secs(30));
        assert!(registry.touch(&reg.key).await);
        assert!(registry.idle_for(&reg.key).await.unwrap() < Duration::from_secs(1));

        registry.unregister(&reg.key).await;
        assert_eq!(registry.idle_for(&reg.key).await, None);
        assert!(!registry.touch(&reg.key).await);
    }
}
