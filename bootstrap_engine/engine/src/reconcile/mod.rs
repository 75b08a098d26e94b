//! Declarative reconciliation of auth methods, policies and secret engines.
//!
//! Each pass is idempotent by construction rather than diff-based: mounts are
//! created only when missing, and everything else is an overwrite the server
//! accepts any number of times. Any failure aborts the rest of the pass,
//! except a write the server rejects as immutable inside a secret engine's
//! nested configuration, which is logged and skipped.

mod auth;
mod secrets;

use serde_json::Value;
use tracing::info;

use crate::admin::{AdminApi, RootSession};
use crate::config::{JsonMap, KubernetesEnv, PolicySpec, ReconcileConfig};
use crate::error::{BootstrapError, Result};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Auth paths enabled during this pass.
    pub auth_enabled: Vec<String>,
    /// Secret engine paths mounted during this pass.
    pub secrets_mounted: Vec<String>,
    /// Secret engine paths that already existed and were tuned.
    pub secrets_tuned: Vec<String>,
    pub policies_written: Vec<String>,
    /// Nested configuration paths rejected as immutable and left alone.
    pub skipped_immutable: Vec<String>,
}

pub struct Reconciler<'s, 'a, A: AdminApi + ?Sized> {
    session: &'s RootSession<'a, A>,
    kubernetes: &'s KubernetesEnv,
}

impl<'s, 'a, A: AdminApi + ?Sized> Reconciler<'s, 'a, A> {
    pub fn new(session: &'s RootSession<'a, A>, kubernetes: &'s KubernetesEnv) -> Self {
        Self {
            session,
            kubernetes,
        }
    }

    /// Auth methods first, then policies, then secret engines.
    pub fn run(&self, desired: &ReconcileConfig) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for method in &desired.auth {
            self.configure_auth_method(method, &mut report)?;
        }

        self.configure_policies(&desired.policies, &mut report)?;

        for engine in &desired.secrets {
            self.configure_secret_engine(engine, &mut report)?;
        }

        info!(
            auth_enabled = report.auth_enabled.len(),
            secrets_mounted = report.secrets_mounted.len(),
            policies = report.policies_written.len(),
            skipped = report.skipped_immutable.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Plain upserts; the server treats a policy write as an overwrite.
    fn configure_policies(&self, policies: &[PolicySpec], report: &mut ReconcileReport) -> Result<()> {
        for policy in policies {
            self.session
                .put_policy(&policy.name, &policy.rules)
                .map_err(|source| BootstrapError::PolicyConfig {
                    name: policy.name.clone(),
                    source,
                })?;
            info!(policy = %policy.name, "policy written");
            report.policies_written.push(policy.name.clone());
        }
        Ok(())
    }
}

/// The `name` field of a role or nested configuration entry.
fn entry_name(entry: &JsonMap) -> Option<&str> {
    match entry.get("name") {
        Some(Value::String(name)) if !name.is_empty() => Some(name.as_str()),
        _ => None,
    }
}
