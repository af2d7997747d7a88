//! Credentials for the two directions the engine talks in.
//!
//! Bridge subscribers prove themselves with an HMAC token bound to their
//! client id. Outgoing gateway updates carry a bearer token fetched from the
//! auth service when `APP_AUTH` is enabled.

use crate::metrics::SINK_FAILURES;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token has expired (age: {age_secs}s, max: {max_secs}s)")]
    TokenExpired { age_secs: u64, max_secs: u64 },

    #[error("Invalid token format")]
    InvalidFormat,

    #[error("Token signature verification failed")]
    InvalidSignature,

    #[error("Token issued to {issued_to:?}, presented by {presented_by:?}")]
    WrongSubscriber {
        issued_to: String,
        presented_by: String,
    },

    #[error("Token decode error: {0}")]
    DecodeError(String),

    #[error("Auth service error: {0}")]
    Service(String),
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub secret: Vec<u8>,
    pub max_age_secs: u64,
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: Vec::new(),
            max_age_secs: 300,
            enabled: false,
        }
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Issues and checks subscriber tokens.
///
/// Token format: `base64("{issued_secs}:{client_id}:" + hmac("{issued_secs}:{client_id}"))`.
pub struct TokenValidator {
    secret: Vec<u8>,
    max_age_secs: u64,
}

impl TokenValidator {
    pub fn new(secret: Vec<u8>, max_age_secs: u64) -> Self {
        Self {
            secret,
            max_age_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.secret.clone(), config.max_age_secs)
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| AuthError::DecodeError(e.to_string()))
    }

    pub fn validate(&self, token: &str, client_id: &str) -> Result<TokenClaims, AuthError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(token)
            .map_err(|e| AuthError::DecodeError(e.to_string()))?;

        if decoded.len() < SIGNATURE_LEN + 2 {
            return Err(AuthError::InvalidFormat);
        }
        let (payload, signature) = decoded.split_at(decoded.len() - SIGNATURE_LEN);
        let payload = payload.strip_suffix(b":").ok_or(AuthError::InvalidFormat)?;

        let text = std::str::from_utf8(payload).map_err(|_| AuthError::InvalidFormat)?;
        let (issued, subscriber) = text.split_once(':').ok_or(AuthError::InvalidFormat)?;
        let issued_at: u64 = issued.parse().map_err(|_| AuthError::InvalidFormat)?;

        let mut mac = self.mac()?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        if subscriber != client_id {
            return Err(AuthError::WrongSubscriber {
                issued_to: subscriber.to_string(),
                presented_by: client_id.to_string(),
            });
        }

        let age = unix_secs().saturating_sub(issued_at);
        if age > self.max_age_secs {
            return Err(AuthError::TokenExpired {
                age_secs: age,
                max_secs: self.max_age_secs,
            });
        }

        Ok(TokenClaims {
            client_id: subscriber.to_string(),
            issued_at,
            age_secs: age,
        })
    }

    pub fn issue(&self, client_id: &str) -> Result<String, AuthError> {
        self.issue_at(client_id, unix_secs())
    }

    fn issue_at(&self, client_id: &str, issued_at: u64) -> Result<String, AuthError> {
        let payload = format!("{issued_at}:{client_id}");
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());

        let mut token = payload.into_bytes();
        token.push(b':');
        token.extend_from_slice(&mac.finalize().into_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(&token))
    }
}

#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub client_id: String,
    pub issued_at: u64,
    pub age_secs: u64,
}

/// Source of the `Authorization` header value for outgoing requests.
pub trait AuthProvider: Send + Sync {
    fn authorization(&self) -> Result<String, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches a fresh bearer token from `POST {auth_url}/api/auth/token` on
/// every call.
pub struct AuthServiceClient {
    client: Client,
    token_url: String,
}

impl AuthServiceClient {
    pub fn new(auth_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Service(e.to_string()))?;
        Ok(Self {
            client,
            token_url: format!("{auth_url}/api/auth/token"),
        })
    }

    fn fetch(&self) -> Result<String, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .send()
            .map_err(|e| AuthError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Service(format!("status {}", status.as_u16())));
        }
        let body: TokenResponse = response
            .json()
            .map_err(|e| AuthError::Service(e.to_string()))?;
        debug!(url = %self.token_url, "fetched gateway token");
        Ok(body.token)
    }
}

impl AuthProvider for AuthServiceClient {
    fn authorization(&self) -> Result<String, AuthError> {
        self.fetch()
            .map(|token| format!("Bearer {token}"))
            .inspect_err(|_| SINK_FAILURES.with_label_values(&["auth"]).inc())
    }
}
