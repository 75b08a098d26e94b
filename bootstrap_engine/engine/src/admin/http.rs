//! Admin API over the server's HTTP interface.
//!
//! Privileged requests carry the credential in `X-Vault-Token`. Failures come
//! back as `{"errors": [...]}` with a non-2xx status and are surfaced as
//! [`AdminError::Api`] so callers can inspect the messages.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::admin::{AdminApi, AdminResult};
use crate::error::AdminError;
use crate::types::{
    InitRequest, InitResponse, KeyShare, MountInfo, MountInput, MountTable, RootToken,
    SealStatus, TokenCreateRequest, mount_key,
};

const DEFAULT_ADDR: &str = "https://127.0.0.1:8200";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct HttpAdminConfig {
    pub addr: String,
    pub namespace: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpAdminConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            namespace: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl HttpAdminConfig {
    /// `VAULT_ADDR`, `VAULT_NAMESPACE` and `VAULT_HTTP_TIMEOUT_SECS`, with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let addr = std::env::var("VAULT_ADDR").unwrap_or(defaults.addr);
        let namespace = std::env::var("VAULT_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());
        let timeout = std::env::var("VAULT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        Self {
            addr,
            namespace,
            timeout,
        }
    }
}

pub struct HttpAdminClient {
    config: HttpAdminConfig,
    client: Client,
}

impl HttpAdminClient {
    pub fn new(config: HttpAdminConfig) -> AdminResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdminError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        api_url(&self.config.addr, path)
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&RootToken>,
        body: Option<&Value>,
    ) -> AdminResult<String> {
        debug!(method = %method, path, "admin request");
        let mut builder = self.client.request(method, self.url(path));
        if let Some(token) = token {
            builder = builder.header("X-Vault-Token", token.expose());
        }
        if let Some(namespace) = &self.config.namespace {
            builder = builder.header("X-Vault-Namespace", namespace);
        }
        if let Some(payload) = body {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .map_err(|e| AdminError::Transport(format!("request to {path} failed: {e}")))?;
        let status = response.status();
        let text = response.text().unwrap_or_default();
        if status.is_success() {
            Ok(text)
        } else {
            Err(parse_error_body(status.as_u16(), &text))
        }
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        token: Option<&RootToken>,
        body: Option<&Value>,
    ) -> AdminResult<T> {
        let text = self.send(method, path, token, body)?;
        serde_json::from_str(&text)
            .map_err(|e| AdminError::Decode(format!("unexpected response from {path}: {e}")))
    }
}

fn api_url(addr: &str, path: &str) -> String {
    format!(
        "{}/v1/{}",
        addr.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

fn parse_error_body(status: u16, body: &str) -> AdminError {
    let errors = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.errors)
        .unwrap_or_default();
    let errors = if errors.is_empty() && !body.trim().is_empty() {
        vec![body.trim().to_string()]
    } else {
        errors
    };
    AdminError::Api { status, errors }
}

/// Mount listings arrive either wrapped in `data` or as top-level keys mixed
/// with response metadata. Only entries that look like mounts are kept.
fn parse_mount_table(body: &str) -> AdminResult<MountTable> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AdminError::Decode(format!("invalid mount listing: {e}")))?;
    let entries = match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(data)) => data,
            _ => map,
        },
        _ => return Err(AdminError::Decode("mount listing is not an object".into())),
    };

    let mut table = MountTable::new();
    for (path, entry) in entries {
        if !path.ends_with('/') || entry.get("type").is_none() {
            continue;
        }
        let info: MountInfo = serde_json::from_value(entry)
            .map_err(|e| AdminError::Decode(format!("invalid mount entry '{path}': {e}")))?;
        table.insert(path, info);
    }
    Ok(table)
}

#[derive(Deserialize)]
struct InitStatusBody {
    initialized: bool,
}

#[derive(Deserialize)]
struct InitBody {
    keys: Vec<String>,
    root_token: String,
}

impl AdminApi for HttpAdminClient {
    fn seal_status(&self) -> AdminResult<SealStatus> {
        self.send_json(Method::GET, "sys/seal-status", None, None)
    }

    fn init_status(&self) -> AdminResult<bool> {
        let body: InitStatusBody = self.send_json(Method::GET, "sys/init", None, None)?;
        Ok(body.initialized)
    }

    fn init(&self, request: &InitRequest) -> AdminResult<InitResponse> {
        let payload = serde_json::to_value(request)
            .map_err(|e| AdminError::Decode(format!("failed to encode init request: {e}")))?;
        let body: InitBody = self.send_json(Method::PUT, "sys/init", None, Some(&payload))?;
        Ok(InitResponse {
            keys: body
                .keys
                .into_iter()
                .map(|k| KeyShare::new(k.into_bytes()))
                .collect(),
            root_token: RootToken::new(body.root_token),
        })
    }

    fn unseal(&self, share: &KeyShare) -> AdminResult<SealStatus> {
        let key = share.as_str_lossy();
        let payload = json!({ "key": key.as_str() });
        self.send_json(Method::PUT, "sys/unseal", None, Some(&payload))
    }

    fn list_auth(&self, token: &RootToken) -> AdminResult<MountTable> {
        let text = self.send(Method::GET, "sys/auth", Some(token), None)?;
        parse_mount_table(&text)
    }

    fn enable_auth(&self, token: &RootToken, path: &str, kind: &str) -> AdminResult<()> {
        let payload = json!({ "type": kind });
        self.send(
            Method::POST,
            &format!("sys/auth/{}", path.trim_matches('/')),
            Some(token),
            Some(&payload),
        )
        .map(|_| ())
    }

    fn write(&self, token: &RootToken, path: &str, data: &Map<String, Value>) -> AdminResult<()> {
        let payload = Value::Object(data.clone());
        self.send(Method::PUT, path, Some(token), Some(&payload))
            .map(|_| ())
    }

    fn list_mounts(&self, token: &RootToken) -> AdminResult<MountTable> {
        let text = self.send(Method::GET, "sys/mounts", Some(token), None)?;
        parse_mount_table(&text)
    }

    fn mount(&self, token: &RootToken, path: &str, input: &MountInput) -> AdminResult<()> {
        let payload = serde_json::to_value(input)
            .map_err(|e| AdminError::Decode(format!("failed to encode mount input: {e}")))?;
        self.send(
            Method::POST,
            &format!("sys/mounts/{}", path.trim_matches('/')),
            Some(token),
            Some(&payload),
        )
        .map(|_| ())
    }

    fn tune_mount(
        &self,
        token: &RootToken,
        path: &str,
        options: &HashMap<String, String>,
    ) -> AdminResult<()> {
        let payload = json!({ "options": options });
        self.send(
            Method::POST,
            &format!("sys/mounts/{}tune", mount_key(path)),
            Some(token),
            Some(&payload),
        )
        .map(|_| ())
    }

    fn put_policy(&self, token: &RootToken, name: &str, rules: &str) -> AdminResult<()> {
        let payload = json!({ "policy": rules });
        self.send(
            Method::PUT,
            &format!("sys/policies/acl/{name}"),
            Some(token),
            Some(&payload),
        )
        .map(|_| ())
    }

    fn create_orphan_token(
        &self,
        token: &RootToken,
        request: &TokenCreateRequest,
    ) -> AdminResult<()> {
        let payload = serde_json::to_value(request)
            .map_err(|e| AdminError::Decode(format!("failed to encode token request: {e}")))?;
        self.send(
            Method::POST,
            "auth/token/create-orphan",
            Some(token),
            Some(&payload),
        )
        .map(|_| ())
    }

    fn revoke_self(&self, token: &RootToken) -> AdminResult<()> {
        self.send(Method::POST, "auth/token/revoke-self", Some(token), None)
            .map(|_| ())
    }
}
