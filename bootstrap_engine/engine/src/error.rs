//! Centralized bootstrap engine error types.

use std::time::Duration;

use thiserror::Error;

/// Server message that marks a configuration entry as write-once.
pub const IMMUTABLE_CONFIG_SIGNATURE: &str = "delete them before reconfiguring";

/// Failures reported by a key-share store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The named key does not exist. The engine branches on this one.
    #[error("key '{0}' not found")]
    NotFound(String),
    /// A create-only write hit an existing key.
    #[error("key '{0}' already exists")]
    AlreadyExists(String),
    /// Anything else the backend could not do.
    #[error("keystore backend error on '{name}': {message}")]
    Backend { name: String, message: String },
}

impl KeyStoreError {
    pub fn backend(name: &str, message: impl Into<String>) -> Self {
        KeyStoreError::Backend {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KeyStoreError::NotFound(_))
    }
}

/// Failures reported by the server's administrative API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Server unreachable or the request never completed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("api error ({status}): {}", errors.join("; "))]
    Api { status: u16, errors: Vec<String> },
    /// The entry is write-once and has to be deleted by hand first.
    #[error("immutable configuration: {0}")]
    Immutable(String),
    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl AdminError {
    /// Whether this failure is the tolerated "delete manually first" class.
    ///
    /// A structured `Immutable` answer wins. Plain API errors only match when
    /// one of their messages carries the known server wording.
    pub fn is_immutable_config(&self) -> bool {
        match self {
            AdminError::Immutable(_) => true,
            AdminError::Api { errors, .. } => errors
                .iter()
                .any(|e| e.contains(IMMUTABLE_CONFIG_SIGNATURE)),
            _ => false,
        }
    }
}

/// Top-level error for Init, Unseal and Configure.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Rejected threshold configuration. Raised before any I/O.
    #[error("Config validation error: {0}")]
    ConfigValidation(String),
    /// Key-share store failure outside the create-only branches.
    #[error("KeyStore error: {0}")]
    KeyStore(#[from] KeyStoreError),
    /// A target key already exists before Init.
    #[error("Init precheck failed: keystore value for '{key}' already exists")]
    InitPrecheck { key: String },
    /// The server refused or failed the init call.
    #[error("Init error: {0}")]
    Init(String),
    /// A freshly generated share could not be persisted.
    #[error("error storing unseal key '{key}': {source}")]
    ShareStore {
        key: String,
        #[source]
        source: KeyStoreError,
    },
    /// Installing, revoking or persisting the root credential failed.
    #[error("Root token error: {0}")]
    RootToken(String),
    /// The bounded wait for an unsealed server ran out.
    #[error("server still sealed after waiting {waited:?}")]
    UnsealWaitTimedOut { waited: Duration },
    /// Submitting a share failed in transport or at the API.
    #[error("unseal request with '{key}' failed: {source}")]
    Unseal {
        key: String,
        #[source]
        source: AdminError,
    },
    /// The server reset its unseal progress to zero.
    #[error("failed to unseal: progress reset to 0 after submitting '{key}'")]
    UnsealReset { key: String },
    #[error("error configuring {kind} auth method at '{path}': {message}")]
    AuthConfig {
        path: String,
        kind: String,
        message: String,
    },
    #[error("error putting policy '{name}': {source}")]
    PolicyConfig {
        name: String,
        #[source]
        source: AdminError,
    },
    #[error("error configuring secret engine at '{path}': {message}")]
    SecretEngineConfig { path: String, message: String },
    /// Server unreachable outside a more specific context.
    #[error("Transport error: {0}")]
    Transport(#[from] AdminError),
    /// The declarative configuration could not be parsed.
    #[error("Spec error: {0}")]
    Spec(String),
    /// The tracing subscriber could not be installed.
    #[error("Logging error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_immutable_is_recognized() {
        assert!(AdminError::Immutable("roles".into()).is_immutable_config());
    }

    #[test]
    fn message_fallback_is_recognized() {
        let err = AdminError::Api {
            status: 400,
            errors: vec!["existing roles are fixed, delete them before reconfiguring".into()],
        };
        assert!(err.is_immutable_config());
    }

    #[test]
    fn other_errors_are_not_immutable() {
        let err = AdminError::Api {
            status: 400,
            errors: vec!["invalid role".into()],
        };
        assert!(!err.is_immutable_config());
        assert!(!AdminError::Transport("connection refused".into()).is_immutable_config());
    }

    #[test]
    fn wait_timeout_keeps_sub_second_precision() {
        let err = BootstrapError::UnsealWaitTimedOut {
            waited: Duration::from_millis(20),
        };
        assert_eq!(err.to_string(), "server still sealed after waiting 20ms");
    }
}
