use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::RngCore;
use serde_json::{Map, Value};
use tracing::debug;

use crate::admin::{AdminApi, AdminResult};
use crate::error::{AdminError, IMMUTABLE_CONFIG_SIGNATURE};
use crate::types::{
    InitRequest, InitResponse, KeyShare, MountInfo, MountInput, MountTable, RootToken,
    SealStatus, TokenCreateRequest, mount_key,
};

/// A mutating call observed by the simulated server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    Init { shares: u32, threshold: u32 },
    /// Index of the generated share that was submitted, `None` for garbage.
    Unseal { share: Option<usize> },
    EnableAuth { path: String, kind: String },
    Write { path: String },
    Mount { path: String, kind: String },
    TuneMount { path: String },
    PutPolicy { name: String },
    CreateOrphanToken { display_name: String },
    RevokeSelf,
}

/// How a rejected immutable write is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImmutableStyle {
    Structured,
    Message,
}

#[derive(Default)]
struct ServerState {
    initialized: bool,
    sealed: bool,
    threshold: u32,
    shares: Vec<String>,
    submitted: Vec<usize>,
    tokens: HashSet<String>,
    auth_mounts: MountTable,
    secret_mounts: MountTable,
    mount_options: HashMap<String, HashMap<String, String>>,
    mount_plugins: HashMap<String, String>,
    writes: BTreeMap<String, Map<String, Value>>,
    policies: BTreeMap<String, String>,
    immutable: HashMap<String, ImmutableStyle>,
    calls: Vec<AdminCall>,
    unreachable: bool,
}

/// In-process stand-in for the secret server.
///
/// Shares are random hex strings rather than real threshold splits; the
/// server simply counts distinct valid shares until the threshold is met.
/// An unknown or repeated share resets progress to zero. Clones share state,
/// so one thread can unseal while another waits.
#[derive(Clone, Default)]
pub struct SimulatedServer {
    state: Arc<Mutex<ServerState>>,
}

impl SimulatedServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.lock().sealed = true;
        server
    }

    /// A server that was already initialized elsewhere, returned sealed along
    /// with the shares and root credential it generated.
    pub fn preinitialized(shares: u32, threshold: u32) -> (Self, Vec<KeyShare>, RootToken) {
        let server = Self::new();
        let resp = server.lock().initialize(shares, threshold);
        (server, resp.keys, resp.root_token)
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Put the server back into the sealed state, as after a restart.
    pub fn seal(&self) {
        let mut state = self.lock();
        state.sealed = true;
        state.submitted.clear();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Reject writes to `path` the way the real server does: a 400 with the
    /// "delete them before reconfiguring" message.
    pub fn mark_immutable(&self, path: &str) {
        self.lock()
            .immutable
            .insert(path.trim_matches('/').to_string(), ImmutableStyle::Message);
    }

    /// Reject writes to `path` with a structured immutable error.
    pub fn mark_immutable_structured(&self, path: &str) {
        self.lock()
            .immutable
            .insert(path.trim_matches('/').to_string(), ImmutableStyle::Structured);
    }

    /// Pre-existing auth mount, as if enabled out of band.
    pub fn add_auth_mount(&self, path: &str, kind: &str) {
        self.lock().auth_mounts.insert(
            mount_key(path),
            MountInfo {
                kind: kind.to_string(),
                description: String::new(),
            },
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn is_token_valid(&self, token: &str) -> bool {
        self.lock().tokens.contains(token)
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn policies(&self) -> BTreeMap<String, String> {
        self.lock().policies.clone()
    }

    pub fn written(&self, path: &str) -> Option<Map<String, Value>> {
        self.lock().writes.get(path.trim_matches('/')).cloned()
    }

    pub fn written_paths(&self) -> Vec<String> {
        self.lock().writes.keys().cloned().collect()
    }

    pub fn auth_mounts(&self) -> MountTable {
        self.lock().auth_mounts.clone()
    }

    pub fn secret_mounts(&self) -> MountTable {
        self.lock().secret_mounts.clone()
    }

    pub fn mount_options(&self, path: &str) -> Option<HashMap<String, String>> {
        self.lock().mount_options.get(&mount_key(path)).cloned()
    }

    /// Plugin named in the mount request, if any.
    pub fn mount_plugin(&self, path: &str) -> Option<String> {
        self.lock().mount_plugins.get(&mount_key(path)).cloned()
    }
}

impl ServerState {
    fn reachable(&self) -> AdminResult<()> {
        if self.unreachable {
            return Err(AdminError::Transport("connection refused".into()));
        }
        Ok(())
    }

    fn authorize(&self, token: &RootToken) -> AdminResult<()> {
        self.reachable()?;
        if self.sealed {
            return Err(api_error(503, "Vault is sealed"));
        }
        if !self.tokens.contains(token.expose()) {
            return Err(api_error(403, "permission denied"));
        }
        Ok(())
    }

    fn initialize(&mut self, shares: u32, threshold: u32) -> InitResponse {
        self.initialized = true;
        self.sealed = true;
        self.threshold = threshold;
        self.shares = (0..shares).map(|_| random_hex(32)).collect();
        let root = format!("s.{}", uuid::Uuid::new_v4().simple());
        self.tokens.insert(root.clone());

        InitResponse {
            keys: self
                .shares
                .iter()
                .map(|s| KeyShare::new(s.as_bytes().to_vec()))
                .collect(),
            root_token: RootToken::new(root),
        }
    }
}

impl AdminApi for SimulatedServer {
    fn seal_status(&self) -> AdminResult<SealStatus> {
        let state = self.lock();
        state.reachable()?;
        Ok(SealStatus {
            sealed: state.sealed,
            progress: state.submitted.len() as u32,
        })
    }

    fn init_status(&self) -> AdminResult<bool> {
        let state = self.lock();
        state.reachable()?;
        Ok(state.initialized)
    }

    fn init(&self, request: &InitRequest) -> AdminResult<InitResponse> {
        let mut state = self.lock();
        state.reachable()?;
        if state.initialized {
            return Err(api_error(400, "Vault is already initialized"));
        }
        if request.secret_threshold == 0 || request.secret_threshold > request.secret_shares {
            return Err(api_error(400, "invalid seal configuration"));
        }
        state.calls.push(AdminCall::Init {
            shares: request.secret_shares,
            threshold: request.secret_threshold,
        });
        Ok(state.initialize(request.secret_shares, request.secret_threshold))
    }

    fn unseal(&self, share: &KeyShare) -> AdminResult<SealStatus> {
        let mut state = self.lock();
        state.reachable()?;
        if !state.initialized {
            return Err(api_error(400, "Vault is not initialized"));
        }

        let submitted = share.as_str_lossy();
        let index = state.shares.iter().position(|s| s.as_str() == submitted.as_str());
        state.calls.push(AdminCall::Unseal { share: index });

        if !state.sealed {
            return Ok(SealStatus {
                sealed: false,
                progress: 0,
            });
        }

        match index {
            Some(i) if !state.submitted.contains(&i) => {
                state.submitted.push(i);
                if state.submitted.len() as u32 >= state.threshold {
                    state.sealed = false;
                    state.submitted.clear();
                    debug!("simulated server unsealed");
                }
            }
            _ => state.submitted.clear(),
        }

        Ok(SealStatus {
            sealed: state.sealed,
            progress: state.submitted.len() as u32,
        })
    }

    fn list_auth(&self, token: &RootToken) -> AdminResult<MountTable> {
        let state = self.lock();
        state.authorize(token)?;
        Ok(state.auth_mounts.clone())
    }

    fn enable_auth(&self, token: &RootToken, path: &str, kind: &str) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        state.calls.push(AdminCall::EnableAuth {
            path: path.to_string(),
            kind: kind.to_string(),
        });
        let key = mount_key(path);
        if state.auth_mounts.contains_key(&key) {
            return Err(api_error(400, &format!("path is already in use at {key}")));
        }
        state.auth_mounts.insert(
            key,
            MountInfo {
                kind: kind.to_string(),
                description: String::new(),
            },
        );
        Ok(())
    }

    fn write(&self, token: &RootToken, path: &str, data: &Map<String, Value>) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        let path = path.trim_matches('/').to_string();
        state.calls.push(AdminCall::Write { path: path.clone() });

        let style = state.immutable.get(&path).copied();
        match style {
            Some(ImmutableStyle::Structured) => return Err(AdminError::Immutable(path)),
            Some(ImmutableStyle::Message) => {
                return Err(api_error(
                    400,
                    &format!("cannot update {path}: {IMMUTABLE_CONFIG_SIGNATURE}"),
                ));
            }
            None => {}
        }

        state.writes.insert(path, data.clone());
        Ok(())
    }

    fn list_mounts(&self, token: &RootToken) -> AdminResult<MountTable> {
        let state = self.lock();
        state.authorize(token)?;
        Ok(state.secret_mounts.clone())
    }

    fn mount(&self, token: &RootToken, path: &str, input: &MountInput) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        state.calls.push(AdminCall::Mount {
            path: path.to_string(),
            kind: input.kind.clone(),
        });
        let key = mount_key(path);
        if state.secret_mounts.contains_key(&key) {
            return Err(api_error(400, &format!("existing mount at {key}")));
        }
        state.secret_mounts.insert(
            key.clone(),
            MountInfo {
                kind: input.kind.clone(),
                description: input.description.clone(),
            },
        );
        if !input.plugin_name.is_empty() {
            state.mount_plugins.insert(key.clone(), input.plugin_name.clone());
        }
        state.mount_options.insert(key, input.options.clone());
        Ok(())
    }

    fn tune_mount(
        &self,
        token: &RootToken,
        path: &str,
        options: &HashMap<String, String>,
    ) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        state.calls.push(AdminCall::TuneMount {
            path: path.to_string(),
        });
        let key = mount_key(path);
        if !state.secret_mounts.contains_key(&key) {
            return Err(api_error(400, &format!("no mount at {key}")));
        }
        state
            .mount_options
            .entry(key)
            .or_default()
            .extend(options.clone());
        Ok(())
    }

    fn put_policy(&self, token: &RootToken, name: &str, rules: &str) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        state.calls.push(AdminCall::PutPolicy {
            name: name.to_string(),
        });
        state.policies.insert(name.to_string(), rules.to_string());
        Ok(())
    }

    fn create_orphan_token(
        &self,
        token: &RootToken,
        request: &TokenCreateRequest,
    ) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        state.calls.push(AdminCall::CreateOrphanToken {
            display_name: request.display_name.clone(),
        });
        if state.tokens.contains(&request.id) {
            return Err(api_error(400, "cannot create a token with a duplicate ID"));
        }
        state.tokens.insert(request.id.clone());
        Ok(())
    }

    fn revoke_self(&self, token: &RootToken) -> AdminResult<()> {
        let mut state = self.lock();
        state.authorize(token)?;
        state.calls.push(AdminCall::RevokeSelf);
        state.tokens.remove(token.expose());
        Ok(())
    }
}

fn api_error(status: u16, message: &str) -> AdminError {
    AdminError::Api {
        status,
        errors: vec![message.to_string()],
    }
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
