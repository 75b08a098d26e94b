//! Deterministic keystore names. These are stable across restarts and must
//! not change, since previously stored shares are found by them.

/// Name of the stored root credential.
pub const ROOT_TOKEN_KEY: &str = "root-token";

/// Disposable key used for the pre-init keystore round trip.
pub const TEST_KEY: &str = "test-key";

const UNSEAL_KEY_PREFIX: &str = "unseal-key-";

/// Name of the `i`-th unseal key share.
pub fn unseal_key_name(i: u32) -> String {
    format!("{UNSEAL_KEY_PREFIX}{i}")
}

/// Inverse of [`unseal_key_name`].
///
/// Enforces:
/// - Format: unseal-key-<n>
/// - `<n>` is a canonical decimal (no sign, no leading zeros)
pub fn parse_unseal_key_name(name: &str) -> Option<u32> {
    let index = name.strip_prefix(UNSEAL_KEY_PREFIX)?;
    if index.is_empty() || (index.len() > 1 && index.starts_with('0')) {
        return None;
    }
    if !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}

/// Every key Init will write: the root credential plus one name per share.
pub fn target_key_names(secret_shares: u32) -> Vec<String> {
    let mut keys = Vec::with_capacity(secret_shares as usize + 1);
    keys.push(ROOT_TOKEN_KEY.to_string());
    keys.extend((0..secret_shares).map(unseal_key_name));
    keys
}
