//! Administrative API of the secret server.
//!
//! The client holds no authentication state. Every privileged call takes the
//! credential explicitly, and [`RootSession`] pairs a client with a root
//! credential for the length of one reconciliation pass.

pub mod http;
pub mod simulated;

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::AdminError;
use crate::types::{
    InitRequest, InitResponse, KeyShare, MountInput, MountTable, RootToken, SealStatus,
    TokenCreateRequest,
};

pub use http::{HttpAdminClient, HttpAdminConfig};
pub use simulated::SimulatedServer;

pub type AdminResult<T> = Result<T, AdminError>;

/// Synchronous request/response facade over the server's admin surface.
pub trait AdminApi {
    fn seal_status(&self) -> AdminResult<SealStatus>;

    fn init_status(&self) -> AdminResult<bool>;

    fn init(&self, request: &InitRequest) -> AdminResult<InitResponse>;

    fn unseal(&self, share: &KeyShare) -> AdminResult<SealStatus>;

    fn list_auth(&self, token: &RootToken) -> AdminResult<MountTable>;

    fn enable_auth(&self, token: &RootToken, path: &str, kind: &str) -> AdminResult<()>;

    /// Generic write used for all auth, secret-engine and role configuration.
    fn write(&self, token: &RootToken, path: &str, data: &Map<String, Value>) -> AdminResult<()>;

    fn list_mounts(&self, token: &RootToken) -> AdminResult<MountTable>;

    fn mount(&self, token: &RootToken, path: &str, input: &MountInput) -> AdminResult<()>;

    fn tune_mount(
        &self,
        token: &RootToken,
        path: &str,
        options: &HashMap<String, String>,
    ) -> AdminResult<()>;

    fn put_policy(&self, token: &RootToken, name: &str, rules: &str) -> AdminResult<()>;

    fn create_orphan_token(&self, token: &RootToken, request: &TokenCreateRequest)
        -> AdminResult<()>;

    /// Revoke the credential used to make the call.
    fn revoke_self(&self, token: &RootToken) -> AdminResult<()>;
}

impl<A: AdminApi + ?Sized> AdminApi for &A {
    fn seal_status(&self) -> AdminResult<SealStatus> {
        (**self).seal_status()
    }
    fn init_status(&self) -> AdminResult<bool> {
        (**self).init_status()
    }
    fn init(&self, request: &InitRequest) -> AdminResult<InitResponse> {
        (**self).init(request)
    }
    fn unseal(&self, share: &KeyShare) -> AdminResult<SealStatus> {
        (**self).unseal(share)
    }
    fn list_auth(&self, token: &RootToken) -> AdminResult<MountTable> {
        (**self).list_auth(token)
    }
    fn enable_auth(&self, token: &RootToken, path: &str, kind: &str) -> AdminResult<()> {
        (**self).enable_auth(token, path, kind)
    }
    fn write(&self, token: &RootToken, path: &str, data: &Map<String, Value>) -> AdminResult<()> {
        (**self).write(token, path, data)
    }
    fn list_mounts(&self, token: &RootToken) -> AdminResult<MountTable> {
        (**self).list_mounts(token)
    }
    fn mount(&self, token: &RootToken, path: &str, input: &MountInput) -> AdminResult<()> {
        (**self).mount(token, path, input)
    }
    fn tune_mount(
        &self,
        token: &RootToken,
        path: &str,
        options: &HashMap<String, String>,
    ) -> AdminResult<()> {
        (**self).tune_mount(token, path, options)
    }
    fn put_policy(&self, token: &RootToken, name: &str, rules: &str) -> AdminResult<()> {
        (**self).put_policy(token, name, rules)
    }
    fn create_orphan_token(
        &self,
        token: &RootToken,
        request: &TokenCreateRequest,
    ) -> AdminResult<()> {
        (**self).create_orphan_token(token, request)
    }
    fn revoke_self(&self, token: &RootToken) -> AdminResult<()> {
        (**self).revoke_self(token)
    }
}

/// A client handle that carries a root credential for a bounded scope.
///
/// The credential is owned by the session and wiped when it drops, whichever
/// way the scope is left.
pub struct RootSession<'a, A: AdminApi + ?Sized> {
    api: &'a A,
    token: Option<RootToken>,
}

impl<'a, A: AdminApi + ?Sized> RootSession<'a, A> {
    pub fn new(api: &'a A, token: RootToken) -> Self {
        Self {
            api,
            token: Some(token),
        }
    }

    fn token(&self) -> AdminResult<&RootToken> {
        self.token
            .as_ref()
            .ok_or_else(|| AdminError::Transport("root session already closed".into()))
    }

    pub fn is_open(&self) -> bool {
        self.token.is_some()
    }

    /// Drop the credential now instead of at end of scope.
    pub fn close(&mut self) {
        if self.token.take().is_some() {
            tracing::debug!("root credential cleared from session");
        }
    }

    pub fn list_auth(&self) -> AdminResult<MountTable> {
        self.api.list_auth(self.token()?)
    }

    pub fn enable_auth(&self, path: &str, kind: &str) -> AdminResult<()> {
        self.api.enable_auth(self.token()?, path, kind)
    }

    pub fn write(&self, path: &str, data: &Map<String, Value>) -> AdminResult<()> {
        self.api.write(self.token()?, path, data)
    }

    pub fn list_mounts(&self) -> AdminResult<MountTable> {
        self.api.list_mounts(self.token()?)
    }

    pub fn mount(&self, path: &str, input: &MountInput) -> AdminResult<()> {
        self.api.mount(self.token()?, path, input)
    }

    pub fn tune_mount(&self, path: &str, options: &HashMap<String, String>) -> AdminResult<()> {
        self.api.tune_mount(self.token()?, path, options)
    }

    pub fn put_policy(&self, name: &str, rules: &str) -> AdminResult<()> {
        self.api.put_policy(self.token()?, name, rules)
    }
}

impl<A: AdminApi + ?Sized> Drop for RootSession<'_, A> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_session_refuses_calls() {
        let server = SimulatedServer::new();
        let mut session = RootSession::new(&server, RootToken::new("s.anything"));
        assert!(session.is_open());

        session.close();
        assert!(!session.is_open());
        assert!(session.list_auth().is_err());
        assert!(server.calls().is_empty());
    }
}
