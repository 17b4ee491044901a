use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Document, ServerMessage};

/// What the hub carries. A refresh is rendered per recipient, since `document_state`
/// depends on the recipient's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    Server(ServerMessage),
    DocumentRefresh(Document),
}

/// One fan-out event. `origin` is the session that caused it. That session does not receive it.
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub origin: Option<Uuid>,
    pub message: Arc<HubMessage>,
}

impl HubEvent {
    /// Whether `session_id` should receive this event.
    pub fn is_for(&self, session_id: Uuid) -> bool {
        self.origin != Some(session_id)
    }
}

/// Per-document fan-out.
///
/// All publishers share one channel, so every subscriber sees events in the single order
/// the channel accepted them. Slow subscribers lag and lose events. There is no replay.
#[derive(Clone)]
pub struct BroadcastHub {
    document_id: Uuid,
    sender: broadcast::Sender<HubEvent>,
}

impl BroadcastHub {
    pub fn new(document_id: Uuid, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { document_id, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Publish to every subscriber except `origin`. Returns the number of receivers reached.
    pub fn publish(&self, origin: Option<Uuid>, message: HubMessage) -> usize {
        let event = HubEvent {
            origin,
            message: Arc::new(message),
        };
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("No subscribers for document {}", self.document_id);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
