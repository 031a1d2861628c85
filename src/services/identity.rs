//! Identity Service collaborator — bearer credential verification.
//!
//! The session core treats identity as an external collaborator: a bearer
//! credential goes in, a verified `{userId, email, name}` comes out, and the
//! core trusts that identity from then on. The trait is object-safe so tests
//! can substitute a mock.

use std::time::Duration;

use serde::Deserialize;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// TYPES
// =============================================================================

/// The identity attached to a connection after verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("credential rejected")]
    Rejected,
    #[error("identity request failed: {0}")]
    Transport(String),
    #[error("identity response malformed: {0}")]
    Malformed(String),
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
}

/// Verifies a bearer credential against the identity service.
#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a credential and return the identity it names.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Rejected`] for an invalid credential and a
    /// transport/parse variant when the service cannot be reached or answers
    /// with an unexpected body.
    async fn verify(&self, token: &str) -> Result<VerifiedUser, IdentityError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// HTTP implementation of the identity collaborator.
pub struct HttpIdentity {
    http: reqwest::Client,
    verify_url: String,
}

impl HttpIdentity {
    /// Build a client for the given verification endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::HttpClientBuild`] if the HTTP client cannot
    /// be constructed.
    pub fn new(verify_url: String) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| IdentityError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, verify_url })
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for HttpIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, IdentityError> {
        let response = self
            .http
            .get(&self.verify_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json::<VerifiedUser>()
                .await
                .map_err(|e| IdentityError::Malformed(e.to_string())),
            401 | 403 => Err(IdentityError::Rejected),
            status => Err(IdentityError::Transport(format!("unexpected status {status}"))),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_user_parses_camel_case() {
        let body = r#"{"userId":"u1","email":"ada@example.com","name":"Ada"}"#;
        let user: VerifiedUser = serde_json::from_str(body).expect("parse");
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.name, "Ada");
    }

    #[test]
    fn http_identity_builds() {
        assert!(HttpIdentity::new("http://localhost:9000/verify".into()).is_ok());
    }
}
