//! JWT Authentication
//!
//! Supports HS256, RS256 and ES256 bearer tokens.

use super::{AuthError, AuthRequest, AuthResult, Authenticator};
use crate::config::JwtConfig;
use crate::metrics;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
}

/// JWT Authenticator
///
/// # Example
///
/// ```
/// use media_uploadr::auth::jwt::JwtAuthenticator;
///
/// let auth = JwtAuthenticator::new_hs256("my-secret")
///     .with_issuer("https://auth.example.com")
///     .with_audience("portfolio-cms");
/// ```
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// HMAC secret (HS256)
    pub fn new_hs256(secret: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
    }

    /// RSA public key in PEM form (RS256)
    pub fn new_rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// EC P-256 public key in PEM form (ES256)
    pub fn new_es256(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::Config(e.to_string()))?;
        Ok(Self::with_key(key, Algorithm::ES256))
    }

    fn with_key(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        // aud is only checked once an audience is configured
        validation.validate_aud = false;

        Self {
            decoding_key,
            validation,
        }
    }

    /// Build from the `auth.jwt` configuration section
    pub fn from_config(config: &JwtConfig) -> Result<Self, AuthError> {
        let key = config
            .secret
            .as_deref()
            .ok_or_else(|| AuthError::Config("auth.jwt.secret is required".into()))?;

        let mut auth = match config.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => Self::new_hs256(key),
            "RS256" => Self::new_rs256(key)?,
            "ES256" => Self::new_es256(key)?,
            other => {
                return Err(AuthError::Config(format!(
                    "unsupported JWT algorithm '{}'",
                    other
                )))
            }
        };

        if let Some(issuer) = &config.issuer {
            auth = auth.with_issuer(issuer);
        }
        if let Some(audience) = &config.audience {
            auth = auth.with_audience(audience);
        }
        Ok(auth)
    }

    /// Require this `iss` claim
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Require this `aud` claim
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    #[tracing::instrument(
        name = "auth.jwt",
        skip(self, request),
        fields(auth.token_present = request.bearer_token.is_some()),
        err(level = "warn")
    )]
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let result = self.verify(request);
        metrics::record_auth_attempt("jwt", result.is_ok());
        result
    }
}

impl JwtAuthenticator {
    fn verify(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let token = request
            .bearer_token
            .as_deref()
            .ok_or(AuthError::MissingAuth)?;

        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let mut claims = HashMap::new();
        if let Some(iss) = &token_data.claims.iss {
            claims.insert("iss".into(), serde_json::Value::String(iss.clone()));
        }
        if let Some(aud) = &token_data.claims.aud {
            claims.insert("aud".into(), serde_json::Value::String(aud.clone()));
        }

        tracing::debug!(subject = %token_data.claims.sub, "JWT authentication successful");

        Ok(AuthResult {
            subject: token_data.claims.sub,
            claims,
        })
    }
}
