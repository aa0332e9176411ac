//! Ephemeral credential acquisition
//!
//! One short-lived bearer token is issued per session by an external
//! backend and authenticates only the offer/answer exchange. The token is
//! never persisted and never logged.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

/// Short-lived bearer token authorizing the realtime negotiation call
#[derive(Clone)]
pub struct EphemeralCredential {
    token: String,
}

impl EphemeralCredential {
    /// Wrap a raw token string
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw bearer token value
    pub fn bearer(&self) -> &str {
        &self.token
    }
}

// The token must not leak through debug logging.
impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Wire shape of the issuer response: `{ client_secret: { value } }`
#[derive(Debug, Deserialize)]
struct IssuerResponse {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

/// Source of ephemeral credentials
///
/// The production implementation talks HTTP to the backend issuer; tests
/// substitute a stub.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Request one ephemeral credential
    ///
    /// # Errors
    ///
    /// `Error::Credential` when the issuer is unreachable or returns a
    /// payload that does not match the expected shape.
    async fn issue(&self) -> Result<EphemeralCredential>;
}

/// HTTP credential issuer client
///
/// Performs a single POST with an empty body and expects
/// `{ "client_secret": { "value": "<token>" } }` back.
pub struct HttpCredentialIssuer {
    client: reqwest::Client,
    url: String,
}

impl HttpCredentialIssuer {
    /// Create an issuer client for the given endpoint URL
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Credential(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self) -> Result<EphemeralCredential> {
        debug!("Requesting ephemeral credential from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|e| Error::Credential(format!("issuer unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Credential(format!(
                "issuer returned status {}",
                status
            )));
        }

        let body: IssuerResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("malformed issuer response: {}", e)))?;

        if body.client_secret.value.is_empty() {
            return Err(Error::Credential(
                "issuer returned an empty token".to_string(),
            ));
        }

        debug!("Ephemeral credential acquired");
        Ok(EphemeralCredential::new(body.client_secret.value))
    }
}
