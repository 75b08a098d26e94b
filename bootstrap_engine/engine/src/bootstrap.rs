//! Init, Unseal and Configure against one server and one keystore.
//!
//! The engine keeps no state of its own between calls. Whether the server is
//! initialized, which shares exist and what the root credential is all live
//! in the server or the keystore, so every call re-reads what it needs.

use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::admin::{AdminApi, RootSession};
use crate::config::{KubernetesEnv, ReconcileConfig, ThresholdConfig, UnsealWait};
use crate::error::{BootstrapError, Result};
use crate::keystore::KeyStore;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::types::{InitRequest, KeyShare, RootToken, TokenCreateRequest};
use crate::utils::keynames::{ROOT_TOKEN_KEY, TEST_KEY, target_key_names, unseal_key_name};

/// Bootstraps and reconciles a single server.
pub struct BootstrapEngine<K: KeyStore, A: AdminApi> {
    keystore: K,
    admin: A,
    config: ThresholdConfig,
    unseal_wait: UnsealWait,
    kubernetes: KubernetesEnv,
}

impl<K: KeyStore, A: AdminApi> BootstrapEngine<K, A> {
    /// `config` is validated at construction, so no I/O happens here.
    pub fn new(keystore: K, admin: A, config: ThresholdConfig) -> Self {
        Self {
            keystore,
            admin,
            config,
            unseal_wait: UnsealWait::default(),
            kubernetes: KubernetesEnv::from_env(),
        }
    }

    pub fn with_unseal_wait(mut self, wait: UnsealWait) -> Self {
        self.unseal_wait = wait;
        self
    }

    pub fn with_kubernetes_env(mut self, env: KubernetesEnv) -> Self {
        self.kubernetes = env;
        self
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    pub fn sealed(&self) -> Result<bool> {
        Ok(self.admin.seal_status()?.sealed)
    }

    /// Submit shares `unseal-key-0`, `unseal-key-1`, ... until the server
    /// reports unsealed.
    ///
    /// A missing share is fatal, since shares are stored contiguously. A
    /// still-sealed answer with zero progress means the server discarded what
    /// it had accumulated, so the loop stops instead of feeding it more.
    pub fn unseal(&self) -> Result<()> {
        let mut i: u32 = 0;
        loop {
            let key = unseal_key_name(i);

            debug!(key = %key, "retrieving key from keystore");
            let share = KeyShare::new(self.keystore.get(&key)?);

            debug!(key = %key, "sending unseal request");
            let status = self
                .admin
                .unseal(&share)
                .map_err(|source| BootstrapError::Unseal {
                    key: key.clone(),
                    source,
                })?;
            drop(share);

            debug!(sealed = status.sealed, progress = status.progress, "got unseal response");

            if !status.sealed {
                info!(shares_submitted = i + 1, "server is unsealed");
                return Ok(());
            }

            if status.progress == 0 {
                return Err(BootstrapError::UnsealReset { key });
            }

            i += 1;
        }
    }

    /// Initialize the server unless it already is.
    pub fn init(&self) -> Result<()> {
        if self.admin.init_status()? {
            info!("server is already initialized");
            return Ok(());
        }

        info!(
            shares = self.config.secret_shares(),
            threshold = self.config.secret_threshold(),
            "initializing server"
        );

        self.keystore.test(TEST_KEY)?;

        for key in target_key_names(self.config.secret_shares()) {
            if self.keystore.contains(&key)? {
                return Err(BootstrapError::InitPrecheck { key });
            }
        }

        let resp = self
            .admin
            .init(&InitRequest {
                secret_shares: self.config.secret_shares(),
                secret_threshold: self.config.secret_threshold(),
            })
            .map_err(|e| BootstrapError::Init(format!("error initializing server: {e}")))?;

        // The server hands shares out once: persist all of them before checking the count.
        for (i, share) in resp.keys.iter().enumerate() {
            let key = unseal_key_name(i as u32);
            if let Err(source) = self.keystore.create(&key, share.as_bytes()) {
                self.salvage_root_token(&resp.root_token);
                return Err(BootstrapError::ShareStore { key, source });
            }
            info!(key = %key, "unseal key stored in keystore");
        }

        if resp.keys.len() != self.config.secret_shares() as usize {
            self.salvage_root_token(&resp.root_token);
            return Err(BootstrapError::Init(format!(
                "server returned {} key shares, expected {}",
                resp.keys.len(),
                self.config.secret_shares()
            )));
        }

        let root_token = match self.config.init_root_token() {
            Some(fixed) => self.install_fixed_root_token(&resp.root_token, fixed)?,
            None => resp.root_token.clone(),
        };

        if self.config.store_root_token() {
            self.keystore
                .create(ROOT_TOKEN_KEY, root_token.as_bytes())
                .map_err(|e| {
                    BootstrapError::RootToken(format!(
                        "error storing root token in key '{ROOT_TOKEN_KEY}': {e}"
                    ))
                })?;
            info!(key = ROOT_TOKEN_KEY, "root token stored in keystore");
        } else if self.config.init_root_token().is_none() {
            warn!(
                root_token = root_token.expose(),
                "won't store root token in keystore, this token grants full privileges so keep it secret"
            );
        }

        Ok(())
    }

    /// Keep a still-valid root credential reachable when Init is about to fail
    /// after the server was initialized: stored if configured, logged otherwise.
    fn salvage_root_token(&self, token: &RootToken) {
        if self.config.store_root_token() {
            match self.keystore.create(ROOT_TOKEN_KEY, token.as_bytes()) {
                Ok(()) => {
                    warn!(key = ROOT_TOKEN_KEY, "init failed, root token stored in keystore");
                    return;
                }
                Err(e) => warn!(error = %e, "init failed and the root token could not be stored"),
            }
        }
        warn!(
            root_token = token.expose(),
            "init failed after the server was initialized, this root token stays valid so keep it secret"
        );
    }

    /// Swap the generated root credential for the configured fixed one.
    /// Needs an unsealed server, so this blocks until something unseals it.
    fn install_fixed_root_token(&self, temporary: &RootToken, fixed: &str) -> Result<RootToken> {
        info!("setting up init root token, waiting for server to be unsealed");
        if let Err(e) = self.wait_until_unsealed() {
            self.salvage_root_token(temporary);
            return Err(e);
        }

        let request = TokenCreateRequest {
            id: fixed.to_string(),
            policies: vec!["root".to_string()],
            display_name: "root-token".to_string(),
            no_parent: true,
        };
        if let Err(e) = self.admin.create_orphan_token(temporary, &request) {
            self.salvage_root_token(temporary);
            return Err(BootstrapError::RootToken(format!(
                "unable to set up requested root token: {e}"
            )));
        }

        let installed = RootToken::new(fixed);
        if let Err(e) = self.admin.revoke_self(temporary) {
            self.salvage_root_token(&installed);
            return Err(BootstrapError::RootToken(format!(
                "unable to revoke temporary root token: {e}"
            )));
        }
        info!("temporary root token revoked, init root token is active");

        Ok(installed)
    }

    fn wait_until_unsealed(&self) -> Result<()> {
        let started = Instant::now();
        loop {
            match self.admin.seal_status() {
                Ok(status) if !status.sealed => return Ok(()),
                Ok(_) => info!("server still sealed, waiting for unsealing"),
                Err(e) => info!(error = %e, "server not reachable"),
            }

            if let Some(timeout) = self.unseal_wait.timeout {
                if started.elapsed() >= timeout {
                    return Err(BootstrapError::UnsealWaitTimedOut {
                        waited: started.elapsed(),
                    });
                }
            }

            thread::sleep(self.unseal_wait.interval);
        }
    }

    /// Reconcile auth methods, policies and secret engines with `desired`.
    ///
    /// The root credential is read from the keystore and lives only in the
    /// session for this call; it is wiped on every exit path.
    pub fn configure(&self, desired: &ReconcileConfig) -> Result<ReconcileReport> {
        debug!(key = ROOT_TOKEN_KEY, "retrieving root token from keystore");
        let token = RootToken::from_bytes(&self.keystore.get(ROOT_TOKEN_KEY)?);

        let session = RootSession::new(&self.admin, token);
        Reconciler::new(&session, &self.kubernetes).run(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::SimulatedServer;
    use crate::keystore::MemoryKeyStore;

    #[test]
    fn sealed_reflects_server_state() {
        let (server, keys, _) = SimulatedServer::preinitialized(1, 1);
        let engine = BootstrapEngine::new(
            MemoryKeyStore::new(),
            server.clone(),
            ThresholdConfig::new(1, 1).unwrap(),
        );
        assert!(engine.sealed().unwrap());

        server.unseal(&keys[0]).unwrap();
        assert!(!engine.sealed().unwrap());
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let server = SimulatedServer::new();
        server.set_reachable(false);
        let engine = BootstrapEngine::new(
            MemoryKeyStore::new(),
            &server,
            ThresholdConfig::new(1, 1).unwrap(),
        );

        assert!(matches!(engine.init(), Err(BootstrapError::Transport(_))));
    }
}
