use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CollabError;
use crate::models::{Document, Role};
use crate::services::auth_service::{validate_jwt, Claims};
use crate::services::persistence::PersistenceAdapter;

/// The identity and role a connection was admitted with. The role is fixed for the
/// lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub document_id: Uuid,
    pub user_id: String,
    pub role: Role,
}

/// Authenticates connection attempts and resolves the caller's role on the document.
pub struct ConnectionGate {
    jwt_secret: Option<String>,
    persistence: Arc<PersistenceAdapter>,
    role_cache: Cache<(Uuid, String), Option<Role>>,
}

impl ConnectionGate {
    pub fn new(jwt_secret: Option<String>, persistence: Arc<PersistenceAdapter>, role_cache_ttl: Duration) -> Self {
        if jwt_secret.is_none() {
            warn!("No AUTH_JWT_SECRET configured, every connection will be refused");
        }
        let role_cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(role_cache_ttl)
            .build();
        Self {
            jwt_secret,
            persistence,
            role_cache,
        }
    }

    /// Validate a bearer token and return its claims.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Claims, CollabError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CollabError::Unauthenticated("Missing token".to_string()))?;
        let secret = self
            .jwt_secret
            .as_deref()
            .ok_or_else(|| CollabError::Unauthenticated("Token validation is not configured".to_string()))?;
        let data = validate_jwt(token, secret).map_err(|e| {
            debug!("JWT validation failed: {}", e);
            CollabError::Unauthenticated(format!("Invalid token: {}", e))
        })?;
        if data.claims.sub.is_empty() {
            return Err(CollabError::Unauthenticated("Token has no subject".to_string()));
        }
        Ok(data.claims)
    }

    /// Admit a websocket connection to a document.
    pub async fn admit(&self, document_id: &str, token: Option<&str>) -> Result<Admission, CollabError> {
        let claims = self.authenticate(token)?;
        let (admission, _) = self.grant(document_id, &claims.sub).await?;
        info!(
            "Admitted {} to document {} as {}",
            admission.user_id, admission.document_id, admission.role
        );
        Ok(admission)
    }

    /// Resolve what an authenticated user may do with a document. Returns the stored document
    /// alongside the admission.
    pub async fn grant(&self, document_id: &str, user_id: &str) -> Result<(Admission, Document), CollabError> {
        let document_id = Uuid::parse_str(document_id)
            .map_err(|_| CollabError::NotFound(document_id.to_string()))?;
        let doc = self.persistence.load(document_id).await?;
        let role = self.resolve_role(&doc, user_id).await?;
        Ok((
            Admission {
                document_id,
                user_id: user_id.to_string(),
                role,
            },
            doc,
        ))
    }

    /// The owner is always `owner`. Otherwise an explicit grant wins, and a public document
    /// falls back to `viewer`.
    pub async fn resolve_role(&self, doc: &Document, user_id: &str) -> Result<Role, CollabError> {
        if doc.owner == user_id {
            return Ok(Role::Owner);
        }
        let key = (doc.id, user_id.to_string());
        let granted = self
            .role_cache
            .try_get_with(key, self.persistence.collaborator_role(doc.id, user_id))
            .await
            .map_err(|e| (*e).clone())?;

        match granted {
            Some(role) => Ok(role),
            None if doc.is_public => Ok(Role::Viewer),
            None => Err(CollabError::Forbidden(format!(
                "User '{}' has no access to document {}",
                user_id, doc.id
            ))),
        }
    }

    pub fn cached_roles(&self) -> u64 {
        self.role_cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::MemoryStore;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "gate-secret";

    fn token_for(sub: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + 600) as usize,
            roles: vec![],
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn gate() -> (Arc<MemoryStore>, ConnectionGate, Document, Document) {
        let store = Arc::new(MemoryStore::new());
        let private = Document::new(Uuid::new_v4(), "Private", "alice");
        let public = Document::new(Uuid::new_v4(), "Public", "alice").with_public(true);
        store.insert_document(private.clone()).await;
        store.insert_document(public.clone()).await;
        store.add_collaborator(private.id, "bob", Role::Editor).await.unwrap();
        let persistence = Arc::new(PersistenceAdapter::new(
            store.clone(),
            RetryPolicy { attempts: 1, backoff: Duration::from_millis(1) },
        ));
        let gate = ConnectionGate::new(Some(SECRET.to_string()), persistence, Duration::from_secs(30));
        (store, gate, private, public)
    }

    #[tokio::test]
    async fn test_roles_are_resolved() {
        let (_, gate, private, public) = gate().await;
        let id = private.id.to_string();

        let owner = gate.admit(&id, Some(&token_for("alice"))).await.unwrap();
        assert_eq!(owner.role, Role::Owner);
        let editor = gate.admit(&id, Some(&token_for("bob"))).await.unwrap();
        assert_eq!(editor.role, Role::Editor);

        let viewer = gate.admit(&public.id.to_string(), Some(&token_for("carol"))).await.unwrap();
        assert_eq!(viewer.role, Role::Viewer);
        let denied = gate.admit(&id, Some(&token_for("carol"))).await;
        assert!(matches!(denied, Err(CollabError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_bad_credentials_and_ids() {
        let (_, gate, private, _) = gate().await;
        let id = private.id.to_string();

        assert!(matches!(gate.admit(&id, None).await, Err(CollabError::Unauthenticated(_))));
        assert!(matches!(gate.admit(&id, Some("garbage")).await, Err(CollabError::Unauthenticated(_))));
        let token = token_for("alice");
        assert!(matches!(gate.admit("not-a-uuid", Some(&token)).await, Err(CollabError::NotFound(_))));
        let missing = Uuid::new_v4().to_string();
        assert!(matches!(gate.admit(&missing, Some(&token)).await, Err(CollabError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_secret_refuses_everyone() {
        let (_, gate, private, _) = gate().await;
        let open = ConnectionGate::new(None, gate.persistence.clone(), Duration::from_secs(30));
        let result = open.admit(&private.id.to_string(), Some(&token_for("alice"))).await;
        assert!(matches!(result, Err(CollabError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_grants_are_cached() {
        let (store, gate, private, _) = gate().await;
        let token = token_for("bob");
        assert_eq!(gate.admit(&private.id.to_string(), Some(&token)).await.unwrap().role, Role::Editor);

        // Revocation is seen once the cached grant expires.
        store.remove_collaborator(private.id, "bob").await;
        assert_eq!(gate.admit(&private.id.to_string(), Some(&token)).await.unwrap().role, Role::Editor);
        gate.role_cache.invalidate_all();
        assert!(matches!(
            gate.admit(&private.id.to_string(), Some(&token)).await,
            Err(CollabError::Forbidden(_))
        ));
    }
}
