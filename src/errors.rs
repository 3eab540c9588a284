//! Error types for ShroudCore

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShroudError>;

#[derive(Error, Debug)]
pub enum ShroudError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid device signals: {0}")]
    InvalidSignals(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("replay detected")]
    ReplayDetected,

    #[error("request timestamp outside clock-skew tolerance")]
    ClockSkew,

    #[error("malformed chunking: {0}")]
    MalformedChunking(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("scoring oracle timed out")]
    OracleTimeout,

    #[error("scoring oracle error: {0}")]
    Oracle(String),

    #[error("injection attempt detected: {0}")]
    InjectionDetected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("other error: {0}")]
    Other(String),
}

impl From<tokio::time::error::Elapsed> for ShroudError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ShroudError::OracleTimeout
    }
}

/// Tagged, sealed debug marker attached to security-relevant failures.
///
/// The captured state is sealed under the master key before it leaves the
/// component that produced it; holders of the key can recover it with
/// [`ErrorContext::open_state`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: String,
    pub location: String,
    pub scrambled_state: String,
}

impl ErrorContext {
    /// Seal `state` under `key` and build a context tagged with `code`.
    pub fn seal(
        key: &crate::crypto::MasterKey,
        code: &str,
        location: &str,
        state: &str,
    ) -> Result<Self> {
        let sealed = key.seal(state.as_bytes())?;
        Ok(Self {
            code: code.to_string(),
            location: location.to_string(),
            scrambled_state: hex::encode(sealed),
        })
    }

    /// Recover the sealed state. Fails without the original master key.
    pub fn open_state(&self, key: &crate::crypto::MasterKey) -> Result<String> {
        let sealed = hex::decode(&self.scrambled_state)
            .map_err(|e| ShroudError::Vault(format!("invalid context encoding: {}", e)))?;
        let plain = key.open(&sealed)?;
        String::from_utf8(plain)
            .map_err(|e| ShroudError::Vault(format!("context state not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MasterKey;

    #[test]
    fn error_context_round_trip() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let ctx = ErrorContext::seal(&key, "ADM-SKEW", "session::admit", "strikes=2").unwrap();
        assert_eq!(ctx.code, "ADM-SKEW");
        assert_eq!(ctx.open_state(&key).unwrap(), "strikes=2");
    }

    #[test]
    fn error_context_wrong_key_fails() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let other = MasterKey::from_bytes([8u8; 32]);
        let ctx = ErrorContext::seal(&key, "ADM-SKEW", "session::admit", "strikes=2").unwrap();
        assert!(ctx.open_state(&other).is_err());
    }
}
