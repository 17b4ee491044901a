use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by bearer tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User identity
    pub sub: String,
    pub exp: usize,
    /// Service-level roles such as `admin`. Document roles come from collaborator grants.
    #[serde(default)]
    pub roles: Vec<String>,
}

// Get the auth token from the request headers, or from a query parameter for browser websockets
pub fn get_auth_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = headers.get(header::COOKIE) {
        let cookie_str = cookie_header.to_str().map_err(|_| "Invalid Cookie header".to_string())?;
        for cookie in cookie::Cookie::split_parse(cookie_str).flatten() {
            if cookie.name() == "auth_token" {
                return Ok(cookie.value().to_string());
            }
        }
    }

    // 3. Fall back to the query string
    match query_token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => Ok(token.to_string()),
        None => Err("Missing Authorization header, auth_token cookie or token parameter".to_string()),
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            roles: vec![],
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(get_auth_token(&headers, Some("ignored")), Ok("abc".to_string()));
    }

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=xyz"));
        assert_eq!(get_auth_token(&headers, None), Ok("xyz".to_string()));
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(get_auth_token(&HeaderMap::new(), Some("q")), Ok("q".to_string()));
        assert!(get_auth_token(&HeaderMap::new(), Some("  ")).is_err());
        assert!(get_auth_token(&HeaderMap::new(), None).is_err());
    }

    #[test]
    fn test_validate_jwt() {
        let valid = token("s3cret", "alice", 3600);
        assert_eq!(validate_jwt(&valid, "s3cret").unwrap().claims.sub, "alice");
        assert!(validate_jwt(&valid, "other").is_err());

        let expired = token("s3cret", "alice", -3600);
        assert!(validate_jwt(&expired, "s3cret").is_err());
    }
}
