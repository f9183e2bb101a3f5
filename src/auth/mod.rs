//! Authentication module
//!
//! Upload requests can be required to carry a bearer JWT. The token subject
//! becomes the actor recorded with every stored file.

use crate::config::AuthConfig;
use async_trait::async_trait;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod jwt;

pub use jwt::JwtAuthenticator;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Authentication configuration error: {0}")]
    Config(String),
}

/// Authenticated identity
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub subject: String,
    pub claims: HashMap<String, serde_json::Value>,
}

/// Credentials presented with a request
#[derive(Debug, Default)]
pub struct AuthRequest {
    /// Bearer token from the `Authorization` header
    pub bearer_token: Option<String>,
}

impl AuthRequest {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let bearer_token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                let (scheme, token) = value.split_once(' ')?;
                scheme
                    .eq_ignore_ascii_case("bearer")
                    .then(|| token.trim().to_string())
            })
            .filter(|token| !token.is_empty());

        Self { bearer_token }
    }
}

/// Authenticator trait
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError>;
}

/// Build the authenticator described by `config`, or `None` when
/// authentication is disabled
pub fn build_authenticator(
    config: &AuthConfig,
) -> Result<Option<Arc<dyn Authenticator>>, AuthError> {
    if !config.enabled {
        return Ok(None);
    }

    let jwt = config
        .jwt
        .as_ref()
        .ok_or_else(|| AuthError::Config("auth.jwt is required when auth is enabled".into()))?;

    Ok(Some(Arc::new(JwtAuthenticator::from_config(jwt)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use hyper::header::HeaderValue;

    #[test]
    fn test_bearer_token_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc.def.ghi"));
        let request = AuthRequest::from_headers(&headers);
        assert_eq!(request.bearer_token.as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_other_scheme_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(AuthRequest::from_headers(&headers).bearer_token.is_none());
    }

    #[test]
    fn test_disabled_auth_builds_nothing() {
        assert!(build_authenticator(&AuthConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_enabled_auth_builds_jwt() {
        let config = AuthConfig {
            enabled: true,
            jwt: Some(JwtConfig {
                secret: Some("secret".into()),
                algorithm: "HS256".into(),
                issuer: None,
                audience: None,
            }),
        };
        assert!(build_authenticator(&config).unwrap().is_some());
    }
}
