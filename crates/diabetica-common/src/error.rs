use thiserror::Error;

/// Failures while building or refreshing a platform credential.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The credential material itself is unusable (malformed JSON, missing fields).
    /// Raised before any network call is attempted.
    #[error("invalid credential configuration: {0}")]
    Configuration(String),

    /// The token exchange failed: network error, non-2xx response or an
    /// unparseable token response.
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl CredentialError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, CredentialError::Configuration(_))
    }
}
