// =============================================================================
// SERVICE ACCOUNT AUTHENTICATION
// =============================================================================
//
// Implements the OAuth2 JWT bearer grant for Google service accounts:
//
// 1. Build a claims set (issuer, read-only scope, audience = token endpoint,
//    issued-at, expiry one hour later)
// 2. Sign it with the service account's RSA private key (RS256)
// 3. POST the assertion to the token endpoint as a form
// 4. Read `access_token` from the JSON answer
//
// **Setup:**
// - Create a service account in Google Cloud Console and download a JSON key
// - Share the Drive files (or folder) with the service account email
// - Point `GOOGLE_SERVICE_ACCOUNT_KEY` at the key file, or put the JSON
//   itself into `GOOGLE_SERVICE_ACCOUNT_JSON`

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::core::auth::{
    AccessTokenProvider, AssertionClaims, AuthError, Credential, JWT_BEARER_GRANT_TYPE,
};

/// Service account credentials from the JSON key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    /// The service account email (used as issuer in JWT).
    pub client_email: String,

    /// The private key in PEM format.
    private_key: String,

    /// The token URI (where to exchange JWT for access token).
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    expires_in: Option<u64>,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
}

/// Signs assertions and trades them for bearer tokens.
///
/// Every call to `obtain_access_token` performs a full exchange; wrap it in
/// a `CachedTokenProvider` to reuse tokens.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    signing_key: EncodingKey,
    client: Client,
    timeout: Option<Duration>,
}

impl ServiceAccountAuth {
    /// Creates a new authenticator from a JSON key file path.
    pub async fn from_file(path: &Path, client: Client) -> Result<Self, AuthError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AuthError::Config(format!(
                "cannot read service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content, client)
    }

    /// Creates a new authenticator from JSON content.
    ///
    /// The private key is parsed here so a broken key fails at startup
    /// rather than on the first request.
    pub fn from_json(json: &str, client: Client) -> Result<Self, AuthError> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)
            .map_err(|e| AuthError::Config(format!("invalid service account JSON: {}", e)))?;

        for (field, value) in [
            ("client_email", &credentials.client_email),
            ("private_key", &credentials.private_key),
            ("token_uri", &credentials.token_uri),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::Config(format!("{} is empty", field)));
            }
        }

        let signing_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| AuthError::Config(format!("invalid private key: {}", e)))?;

        Ok(Self {
            credentials,
            signing_key,
            client,
            timeout: None,
        })
    }

    /// Bounds each token exchange end-to-end.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn client_email(&self) -> &str {
        &self.credentials.client_email
    }

    /// Produces the compact `header.payload.signature` assertion.
    pub fn sign_assertion(&self, claims: &AssertionClaims) -> Result<String, AuthError> {
        let header = Header::new(Algorithm::RS256);
        encode(&header, claims, &self.signing_key).map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Trades a signed assertion for a bearer token. Not retried.
    async fn exchange(&self, assertion: &str) -> Result<TokenResponse, AuthError> {
        let mut request = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT_TYPE),
                ("assertion", assertion),
            ]);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(error = %e, "Could not read token endpoint error body");
                    format!("<unreadable body: {}>", e)
                }
            };
            tracing::warn!(status, "Token exchange rejected");
            return Err(AuthError::Rejected { status, body });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountAuth {
    async fn obtain_access_token(&self) -> Result<Credential, AuthError> {
        let claims = AssertionClaims::new(
            &self.credentials.client_email,
            &self.credentials.token_uri,
            Utc::now(),
        );
        let assertion = self.sign_assertion(&claims)?;
        let token = self.exchange(&assertion).await?;

        tracing::debug!(issuer = %claims.iss, "Obtained access token");

        Ok(Credential {
            issuer: claims.iss.clone(),
            assertion,
            access_token: token.access_token,
            expires_at: claims.expires_at(),
        })
    }
}
