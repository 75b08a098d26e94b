//! Shared data types for the bootstrap engine: shares, credentials and the
//! request/response shapes of the admin API.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// One unseal key share. Wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyShare(Zeroizing<Vec<u8>>);

impl KeyShare {
    pub fn new(bytes: impl Into<Zeroizing<Vec<u8>>>) -> Self {
        KeyShare(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Shares travel to the server as text.
    pub fn as_str_lossy(&self) -> Zeroizing<String> {
        Zeroizing::new(String::from_utf8_lossy(&self.0).into_owned())
    }
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyShare(<redacted>)")
    }
}

/// A root-equivalent credential. Wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct RootToken(Zeroizing<String>);

impl RootToken {
    pub fn new(token: impl Into<String>) -> Self {
        RootToken(Zeroizing::new(token.into()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        RootToken::new(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for RootToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootToken(<redacted>)")
    }
}

/// Seal state as reported after a status query or an unseal submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(default)]
    pub progress: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitRequest {
    pub secret_shares: u32,
    pub secret_threshold: u32,
}

/// Result of initializing the server: the shares and the generated root credential.
pub struct InitResponse {
    pub keys: Vec<KeyShare>,
    pub root_token: RootToken,
}

/// An existing auth or secret mount, keyed by `path/` in listings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MountInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

pub type MountTable = HashMap<String, MountInfo>;

/// Mount request for a secret engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub plugin_name: String,
    pub options: HashMap<String, String>,
}

/// Request for an orphan credential with a caller-chosen identifier.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenCreateRequest {
    pub id: String,
    pub policies: Vec<String>,
    pub display_name: String,
    pub no_parent: bool,
}

impl fmt::Debug for TokenCreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCreateRequest")
            .field("id", &"<redacted>")
            .field("policies", &self.policies)
            .field("display_name", &self.display_name)
            .field("no_parent", &self.no_parent)
            .finish()
    }
}

/// Lookup key used for a mount path in listings.
pub fn mount_key(path: &str) -> String {
    format!("{}/", path.trim_matches('/'))
}
