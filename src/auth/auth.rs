use axum::{http::StatusCode, Json};

use crate::error::CollabError;
use crate::models::{ClientMessage, ErrorResponse, Role};

const ADMIN_ROLE: &str = "admin";

/// What a session is trying to do with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Edit,
    Save,
}

impl Action {
    /// The action a client message requires.
    pub fn of(message: &ClientMessage) -> Self {
        match message {
            ClientMessage::Operation(_) => Action::Edit,
            ClientMessage::Save(_) => Action::Save,
            ClientMessage::CursorUpdate(_)
            | ClientMessage::RequestDocumentState(_)
            | ClientMessage::Ping(_)
            | ClientMessage::Pong(_) => Action::Read,
        }
    }

    pub fn requires_write(self) -> bool {
        matches!(self, Action::Edit | Action::Save)
    }
}

/// The single role check for document access.
pub fn authorize(role: Role, action: Action) -> Result<(), CollabError> {
    if action.requires_write() && !role.can_edit() {
        return Err(CollabError::PermissionDenied(format!(
            "Role '{}' cannot {}",
            role,
            match action {
                Action::Save => "save the document",
                _ => "edit the document",
            }
        )));
    }
    Ok(())
}

pub fn is_admin(roles: &[String]) -> bool {
    roles.iter().any(|r| r == ADMIN_ROLE)
}

pub fn ensure_admin(roles: &[String]) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if is_admin(roles) {
        return Ok(());
    }

    let status = StatusCode::FORBIDDEN;
    Err((status, Json(ErrorResponse {
        code: status.as_u16(),
        status: status.to_string(),
        error: "Admin access required".to_string(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CursorMessage, OperationRequest, SaveRequest};

    #[test]
    fn test_viewer_cannot_write() {
        assert!(matches!(authorize(Role::Viewer, Action::Edit), Err(CollabError::PermissionDenied(_))));
        assert!(matches!(authorize(Role::Viewer, Action::Save), Err(CollabError::PermissionDenied(_))));
        assert!(authorize(Role::Viewer, Action::Read).is_ok());
    }

    #[test]
    fn test_editor_and_owner_can_write() {
        for role in [Role::Owner, Role::Editor] {
            assert!(authorize(role, Action::Edit).is_ok());
            assert!(authorize(role, Action::Save).is_ok());
        }
    }

    #[test]
    fn test_message_actions() {
        let op = ClientMessage::Operation(OperationRequest {
            kind: "insert".into(),
            position: 0,
            content: "x".into(),
            old_content: None,
        });
        assert_eq!(Action::of(&op), Action::Edit);
        assert_eq!(Action::of(&ClientMessage::Save(SaveRequest::default())), Action::Save);
        assert_eq!(Action::of(&ClientMessage::CursorUpdate(CursorMessage { position: 1 })), Action::Read);
    }

    #[test]
    fn test_admin_role() {
        assert!(is_admin(&["admin".to_string()]));
        assert!(ensure_admin(&["editor".to_string()]).is_err());
    }
}
