use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CollabError;
use crate::models::{Document, Operation, OperationRequest, Role, SaveRequest, SessionInfo};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CursorMessage {
    pub position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub time: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StateRequestMessage {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthResponseMessage {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DocumentStateMessage {
    pub document: Document,
    pub can_edit: bool,
    pub role: Role,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CursorUpdateMessage {
    pub user_id: String,
    pub session_id: Uuid,
    pub position: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PresenceMessage {
    pub user_id: String,
    pub session_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActiveSessionsMessage {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
}

impl From<&CollabError> for ErrorMessage {
    fn from(err: &CollabError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Messages a client may send, framed as `{"type": ..., "payload": {...}}`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Operation(OperationRequest),
    CursorUpdate(CursorMessage),
    RequestDocumentState(StateRequestMessage),
    Save(SaveRequest),
    Ping(PingMessage),
    Pong(PingMessage),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ClientMessage {
    /// Parse a text frame. A missing or null payload is read as `{}`.
    pub fn parse(text: &str) -> Result<Self, CollabError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| CollabError::InvalidOperation(format!("Malformed message: {}", e)))?;
        let payload = match envelope.payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        fn body<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, CollabError> {
            serde_json::from_value(payload)
                .map_err(|e| CollabError::InvalidOperation(format!("Malformed '{}' payload: {}", kind, e)))
        }

        let kind = envelope.kind.as_str();
        match kind {
            "operation" => body(kind, payload).map(ClientMessage::Operation),
            "cursor_update" => body(kind, payload).map(ClientMessage::CursorUpdate),
            "request_document_state" => body(kind, payload).map(ClientMessage::RequestDocumentState),
            "save" => body(kind, payload).map(ClientMessage::Save),
            "ping" => body(kind, payload).map(ClientMessage::Ping),
            "pong" => body(kind, payload).map(ClientMessage::Pong),
            other => Err(CollabError::InvalidOperation(format!("Unknown message type '{}'", other))),
        }
    }
}

/// Messages the server sends.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResponse(AuthResponseMessage),
    DocumentState(DocumentStateMessage),
    Operation(Operation),
    CursorUpdate(CursorUpdateMessage),
    UserJoined(PresenceMessage),
    UserLeft(PresenceMessage),
    ActiveSessions(ActiveSessionsMessage),
    Error(ErrorMessage),
    Pong(PingMessage),
    Ping(PingMessage),
}

impl ServerMessage {
    pub fn error(err: &CollabError) -> Self {
        ServerMessage::Error(ErrorMessage::from(err))
    }

    pub fn document_state(document: Document, role: Role) -> Self {
        ServerMessage::DocumentState(DocumentStateMessage {
            document,
            can_edit: role.can_edit(),
            role,
        })
    }
}
