// This is the auth module - it describes WHAT a bearer credential is and how
// long it lives, without knowing anything about Google, HTTP or JWT libraries.
// The infra layer signs and exchanges the assertion; the proxy only asks for
// "a token that is valid right now".

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Read-only access to the storage backend.
pub const READ_ONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Grant type for exchanging a signed assertion for a bearer token.
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Every assertion (and the token it buys) is valid for one hour.
pub const CREDENTIAL_LIFETIME_SECS: i64 = 3600;

/// A cached credential is refreshed this long before it actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A bearer credential for the storage backend.
///
/// Created per token request and never persisted.
#[derive(Clone)]
pub struct Credential {
    /// Service account identity that issued the assertion.
    pub issuer: String,
    /// The signed assertion that was exchanged. Single use, so cached
    /// copies carry an empty string.
    pub assertion: String,
    /// The bearer token returned by the token endpoint.
    pub access_token: String,
    /// Always `issued_at + 3600s`.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Is this credential still usable at `now`, leaving `margin` to spare?
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at > now + margin
    }
}

// Tokens and assertions must never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("issuer", &self.issuer)
            .field("assertion", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Claims set of the signed assertion (RFC 7523 shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionClaims {
    /// Issuer (service account email).
    pub iss: String,
    /// Scope (what APIs we want access to).
    pub scope: String,
    /// Audience (token endpoint).
    pub aud: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp, always iat + 3600).
    pub exp: i64,
}

impl AssertionClaims {
    /// Builds the read-only claims set for `issuer`, issued at `now`.
    pub fn new(issuer: &str, audience: &str, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: issuer.to_string(),
            scope: READ_ONLY_SCOPE.to_string(),
            aud: audience.to_string(),
            iat,
            exp: iat + CREDENTIAL_LIFETIME_SECS,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed service account configuration. Not retried.
    #[error("Service account configuration error: {0}")]
    Config(String),

    #[error("Failed to sign assertion: {0}")]
    Signing(String),

    /// The token endpoint rejected the exchange.
    #[error("Token exchange failed ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    #[error("Unexpected token endpoint response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// TOKEN PROVIDER TRAIT (PORT)
// ============================================================================

/// Anything that can hand out a bearer credential for the storage backend.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn obtain_access_token(&self) -> Result<Credential, AuthError>;
}

// ============================================================================
// CACHING DECORATOR
// ============================================================================

/// Wraps another provider and reuses its credential until shortly before
/// expiry. Observable behavior is identical to asking every time, minus the
/// extra round trips.
pub struct CachedTokenProvider<P: AccessTokenProvider> {
    inner: P,
    cached: RwLock<Option<Credential>>,
    margin: Duration,
}

impl<P: AccessTokenProvider> CachedTokenProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
            margin: Duration::seconds(REFRESH_MARGIN_SECS),
        }
    }
}

#[async_trait]
impl<P: AccessTokenProvider> AccessTokenProvider for CachedTokenProvider<P> {
    async fn obtain_access_token(&self) -> Result<Credential, AuthError> {
        {
            let cached = self.cached.read().await;
            if let Some(credential) = cached.as_ref() {
                if credential.is_valid_at(Utc::now(), self.margin) {
                    return Ok(credential.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(credential) = cached.as_ref() {
            if credential.is_valid_at(Utc::now(), self.margin) {
                return Ok(credential.clone());
            }
        }

        let mut fresh = self.inner.obtain_access_token().await?;
        fresh.assertion.clear();
        tracing::debug!(expires_at = %fresh.expires_at, "Refreshed access token");
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}

// A Box<dyn AccessTokenProvider> is itself a provider, so main can pick
// cached or uncached at runtime.
#[async_trait]
impl AccessTokenProvider for Box<dyn AccessTokenProvider> {
    async fn obtain_access_token(&self) -> Result<Credential, AuthError> {
        (**self).obtain_access_token().await
    }
}
