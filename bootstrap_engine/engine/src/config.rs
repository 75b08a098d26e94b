//! Engine configuration and the declarative desired state.
//!
//! The desired state arrives already parsed from whatever file format the
//! caller uses. Type-specific payloads are kept as JSON maps and forwarded to
//! the server mostly as-is; keys this crate does not model survive in the
//! flattened `extra` maps.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BootstrapError, Result};

/// Default cadence of the wait-for-unseal loop.
pub const DEFAULT_UNSEAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How many shares Init asks for, how many unseal the server, and what happens
/// to the root credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholdConfig", rename_all = "camelCase")]
pub struct ThresholdConfig {
    secret_shares: u32,
    secret_threshold: u32,
    init_root_token: Option<String>,
    store_root_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThresholdConfig {
    secret_shares: u32,
    secret_threshold: u32,
    #[serde(default)]
    init_root_token: Option<String>,
    #[serde(default)]
    store_root_token: bool,
}

impl TryFrom<RawThresholdConfig> for ThresholdConfig {
    type Error = BootstrapError;

    fn try_from(raw: RawThresholdConfig) -> Result<Self> {
        Ok(ThresholdConfig::new(raw.secret_shares, raw.secret_threshold)?
            .with_init_root_token(raw.init_root_token)
            .with_store_root_token(raw.store_root_token))
    }
}

impl ThresholdConfig {
    /// Fails when the threshold exceeds the share count, or either is zero.
    pub fn new(secret_shares: u32, secret_threshold: u32) -> Result<Self> {
        if secret_threshold > secret_shares {
            return Err(BootstrapError::ConfigValidation(format!(
                "the secret threshold ({secret_threshold}) can't be bigger than the shares ({secret_shares})"
            )));
        }
        if secret_threshold == 0 {
            return Err(BootstrapError::ConfigValidation(
                "the secret threshold must be at least 1".into(),
            ));
        }
        Ok(Self {
            secret_shares,
            secret_threshold,
            init_root_token: None,
            store_root_token: false,
        })
    }

    /// Replace the generated root credential with this fixed identifier.
    /// An empty string means "not configured".
    pub fn with_init_root_token(mut self, token: Option<String>) -> Self {
        self.init_root_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_store_root_token(mut self, store: bool) -> Self {
        self.store_root_token = store;
        self
    }

    pub fn secret_shares(&self) -> u32 {
        self.secret_shares
    }

    pub fn secret_threshold(&self) -> u32 {
        self.secret_threshold
    }

    pub fn init_root_token(&self) -> Option<&str> {
        self.init_root_token.as_deref()
    }

    pub fn store_root_token(&self) -> bool {
        self.store_root_token
    }
}

/// Polling policy for the wait-until-unsealed step of Init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsealWait {
    pub interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for UnsealWait {
    fn default() -> Self {
        Self {
            interval: DEFAULT_UNSEAL_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Where the in-cluster service-account material is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesEnv {
    pub ca_cert_path: PathBuf,
    pub token_path: PathBuf,
    /// Value of `KUBERNETES_SERVICE_HOST`.
    pub service_host: String,
}

impl KubernetesEnv {
    pub const CA_CERT_PATH: &'static str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
    pub const TOKEN_PATH: &'static str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

    pub fn from_env() -> Self {
        Self {
            ca_cert_path: PathBuf::from(Self::CA_CERT_PATH),
            token_path: PathBuf::from(Self::TOKEN_PATH),
            service_host: std::env::var("KUBERNETES_SERVICE_HOST").unwrap_or_default(),
        }
    }

    pub fn api_host(&self) -> String {
        format!("https://{}", self.service_host)
    }
}

impl Default for KubernetesEnv {
    fn default() -> Self {
        Self::from_env()
    }
}

/// The desired server state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
    #[serde(default)]
    pub auth: Vec<AuthMethodSpec>,
    #[serde(default)]
    pub secrets: Vec<SecretEngineSpec>,
}

impl ReconcileConfig {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| BootstrapError::Spec(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BootstrapError::Spec(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub rules: String,
}

pub type JsonMap = Map<String, Value>;

/// One auth method: where it is mounted and how it is configured.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawAuthMethod")]
pub struct AuthMethodSpec {
    pub path: Option<String>,
    pub backend: AuthBackend,
}

impl AuthMethodSpec {
    pub fn kind(&self) -> &str {
        self.backend.kind()
    }

    /// Explicit path, or the type name.
    pub fn mount_path(&self) -> &str {
        self.path
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.kind())
    }
}

/// Type-specific auth settings.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthBackend {
    Kubernetes(KubernetesAuth),
    Github(GithubAuth),
    Aws(AwsAuth),
    Ldap(LdapAuth),
    /// Any other type: enabled, never post-configured.
    Generic { kind: String, extra: JsonMap },
}

impl AuthBackend {
    pub fn kind(&self) -> &str {
        match self {
            AuthBackend::Kubernetes(_) => "kubernetes",
            AuthBackend::Github(_) => "github",
            AuthBackend::Aws(_) => "aws",
            AuthBackend::Ldap(_) => "ldap",
            AuthBackend::Generic { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct KubernetesAuth {
    /// Merged over the derived host/CA/JWT settings.
    #[serde(default)]
    pub config: JsonMap,
    #[serde(default)]
    pub roles: Vec<JsonMap>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GithubAuth {
    #[serde(default)]
    pub config: JsonMap,
    /// Mapping type (`teams`, `users`) to name to policy.
    #[serde(default)]
    pub map: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AwsAuth {
    #[serde(default)]
    pub config: JsonMap,
    #[serde(default)]
    pub roles: Vec<JsonMap>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LdapAuth {
    #[serde(default)]
    pub config: JsonMap,
    #[serde(default)]
    pub groups: BTreeMap<String, JsonMap>,
    #[serde(default)]
    pub users: BTreeMap<String, JsonMap>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Deserialize)]
struct RawAuthMethod {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(flatten)]
    rest: JsonMap,
}

impl TryFrom<RawAuthMethod> for AuthMethodSpec {
    type Error = String;

    fn try_from(raw: RawAuthMethod) -> std::result::Result<Self, String> {
        fn typed<T: serde::de::DeserializeOwned>(kind: &str, rest: JsonMap) -> std::result::Result<T, String> {
            serde_json::from_value(Value::Object(rest))
                .map_err(|e| format!("invalid {kind} auth method: {e}"))
        }

        let backend = match raw.kind.as_str() {
            "kubernetes" => AuthBackend::Kubernetes(typed(&raw.kind, raw.rest)?),
            "github" => AuthBackend::Github(typed(&raw.kind, raw.rest)?),
            "aws" => AuthBackend::Aws(typed(&raw.kind, raw.rest)?),
            "ldap" => AuthBackend::Ldap(typed(&raw.kind, raw.rest)?),
            "" => return Err("auth method type must not be empty".into()),
            _ => AuthBackend::Generic {
                kind: raw.kind,
                extra: raw.rest,
            },
        };
        Ok(AuthMethodSpec {
            path: raw.path,
            backend,
        })
    }
}

/// One secret engine mount and its nested configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecretEngineSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plugin_name: String,
    /// Mutable mount options, re-applied on every pass.
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Category name to named sub-objects, each written to `path/category/name`.
    /// Categories are applied in the order they are declared.
    #[serde(default, deserialize_with = "declared_order")]
    pub configuration: Vec<(String, Vec<JsonMap>)>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Reads a map of categories without re-sorting its keys, so `config` can be
/// declared ahead of the `roles` that depend on it whatever the names.
fn declared_order<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, Vec<JsonMap>)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Categories;

    impl<'de> Visitor<'de> for Categories {
        type Value = Vec<(String, Vec<JsonMap>)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of configuration categories")
        }

        fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> std::result::Result<Self::Value, M::Error> {
            let mut categories = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((category, entries)) = map.next_entry::<String, Vec<JsonMap>>()? {
                categories.push((category, entries));
            }
            Ok(categories)
        }
    }

    deserializer.deserialize_map(Categories)
}

impl SecretEngineSpec {
    pub fn mount_path(&self) -> &str {
        self.path
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_above_shares_is_rejected() {
        let err = ThresholdConfig::new(3, 5).unwrap_err();
        assert!(matches!(err, BootstrapError::ConfigValidation(_)));
        assert!(ThresholdConfig::new(5, 3).is_ok());
        assert!(ThresholdConfig::new(1, 1).is_ok());
        assert!(ThresholdConfig::new(0, 0).is_err());
    }

    #[test]
    fn deserialization_goes_through_validation() {
        let ok: ThresholdConfig = serde_json::from_str(
            r#"{"secretShares": 5, "secretThreshold": 3, "storeRootToken": true, "initRootToken": ""}"#,
        )
        .unwrap();
        assert!(ok.store_root_token());
        assert_eq!(ok.init_root_token(), None);

        let bad = serde_json::from_str::<ThresholdConfig>(r#"{"secretShares": 1, "secretThreshold": 2}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn auth_methods_parse_into_typed_variants() {
        let spec = ReconcileConfig::from_json_str(
            r#"{
                "auth": [
                    {"type": "kubernetes", "roles": [{"name": "default", "bound_service_account_names": "default"}]},
                    {"type": "github", "path": "gh", "config": {"organization": "acme"},
                     "map": {"teams": {"dev": "dev-policy"}}, "future_field": 1},
                    {"type": "userpass"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.auth[0].mount_path(), "kubernetes");
        match &spec.auth[1].backend {
            AuthBackend::Github(gh) => {
                assert_eq!(gh.map["teams"]["dev"], "dev-policy");
                assert_eq!(gh.extra["future_field"], 1);
            }
            other => panic!("unexpected backend {other:?}"),
        }
        assert_eq!(spec.auth[1].mount_path(), "gh");
        assert_eq!(spec.auth[2].kind(), "userpass");
    }

    #[test]
    fn missing_auth_type_is_a_spec_error() {
        let err = ReconcileConfig::from_json_str(r#"{"auth": [{"path": "x"}]}"#).unwrap_err();
        assert!(matches!(err, BootstrapError::Spec(_)));
    }

    #[test]
    fn secret_engine_defaults() {
        let spec = ReconcileConfig::from_json_str(
            r#"{"secrets": [{"type": "database", "configuration": {"roles": [{"name": "ro"}]}}]}"#,
        )
        .unwrap();
        let engine = &spec.secrets[0];
        assert_eq!(engine.mount_path(), "database");
        assert!(engine.options.is_empty());
        assert_eq!(engine.configuration.len(), 1);
        assert_eq!(engine.configuration[0].0, "roles");
        assert_eq!(engine.configuration[0].1.len(), 1);
    }

    #[test]
    fn configuration_categories_keep_declared_order() {
        let spec = ReconcileConfig::from_json_str(
            r#"{"secrets": [{"type": "pki", "path": "pki", "configuration": {
                "root/generate": [{"name": "internal", "common_name": "example.internal"}],
                "config": [{"name": "urls"}],
                "roles": [{"name": "web"}]
            }}]}"#,
        )
        .unwrap();

        let categories: Vec<&str> = spec.secrets[0]
            .configuration
            .iter()
            .map(|(category, _)| category.as_str())
            .collect();
        assert_eq!(categories, vec!["root/generate", "config", "roles"]);
    }
}
