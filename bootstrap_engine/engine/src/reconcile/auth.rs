use std::fs;

use serde_json::Value;
use tracing::{debug, info};

use crate::admin::AdminApi;
use crate::config::{
    AuthBackend, AuthMethodSpec, AwsAuth, GithubAuth, JsonMap, KubernetesAuth, LdapAuth,
};
use crate::error::{BootstrapError, Result};
use crate::reconcile::{ReconcileReport, Reconciler, entry_name};
use crate::types::mount_key;

impl<A: AdminApi + ?Sized> Reconciler<'_, '_, A> {
    /// Enable the method unless a mount of the same type already sits at its
    /// path, then apply the type-specific configuration.
    pub(super) fn configure_auth_method(
        &self,
        method: &AuthMethodSpec,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let path = method.mount_path();
        let kind = method.kind();
        let fail = |message: String| BootstrapError::AuthConfig {
            path: path.to_string(),
            kind: kind.to_string(),
            message,
        };

        let existing = self
            .session
            .list_auth()
            .map_err(|e| fail(format!("error listing auth backends: {e}")))?;

        let mounted = existing
            .get(&mount_key(path))
            .is_some_and(|mount| mount.kind == kind);

        if mounted {
            debug!(kind, path, "auth backend is already mounted");
        } else {
            debug!(kind, path, "enabling auth backend");
            self.session
                .enable_auth(path, kind)
                .map_err(|e| fail(format!("error enabling auth method: {e}")))?;
            info!(kind, path, "auth backend enabled");
            report.auth_enabled.push(path.to_string());
        }

        let configured = match &method.backend {
            AuthBackend::Kubernetes(k8s) => self.configure_kubernetes(path, k8s),
            AuthBackend::Github(github) => self.configure_github(path, github),
            AuthBackend::Aws(aws) => self.configure_aws(path, aws),
            AuthBackend::Ldap(ldap) => self.configure_ldap(path, ldap),
            AuthBackend::Generic { .. } => Ok(()),
        };
        configured.map_err(fail)
    }

    fn configure_kubernetes(&self, path: &str, k8s: &KubernetesAuth) -> std::result::Result<(), String> {
        let ca_cert = fs::read_to_string(&self.kubernetes.ca_cert_path).map_err(|e| {
            format!(
                "error reading service account CA from {}: {e}",
                self.kubernetes.ca_cert_path.display()
            )
        })?;
        let reviewer_jwt = fs::read_to_string(&self.kubernetes.token_path).map_err(|e| {
            format!(
                "error reading service account token from {}: {e}",
                self.kubernetes.token_path.display()
            )
        })?;

        let mut config = JsonMap::new();
        config.insert("kubernetes_host".into(), Value::String(self.kubernetes.api_host()));
        config.insert("kubernetes_ca_cert".into(), Value::String(ca_cert));
        config.insert("token_reviewer_jwt".into(), Value::String(reviewer_jwt));
        config.extend(k8s.config.clone());

        self.write(&format!("auth/{path}/config"), &config, "kubernetes config")?;
        self.write_roles(path, &k8s.roles, "kubernetes")
    }

    fn configure_github(&self, path: &str, github: &GithubAuth) -> std::result::Result<(), String> {
        self.write(&format!("auth/{path}/config"), &github.config, "github config")?;

        for (mapping_type, mappings) in &github.map {
            for (team_or_user, policy) in mappings {
                let mut data = JsonMap::new();
                data.insert("value".into(), Value::String(policy.clone()));
                self.write(
                    &format!("auth/{path}/map/{mapping_type}/{team_or_user}"),
                    &data,
                    &format!("github {mapping_type} mapping"),
                )?;
            }
        }
        Ok(())
    }

    fn configure_aws(&self, path: &str, aws: &AwsAuth) -> std::result::Result<(), String> {
        self.write(&format!("auth/{path}/config/client"), &aws.config, "aws config")?;
        self.write_roles(path, &aws.roles, "aws")
    }

    fn configure_ldap(&self, path: &str, ldap: &LdapAuth) -> std::result::Result<(), String> {
        self.write(&format!("auth/{path}/config"), &ldap.config, "ldap config")?;

        for (group, mapping) in &ldap.groups {
            self.write(&format!("auth/{path}/groups/{group}"), mapping, "ldap group mapping")?;
        }
        for (user, mapping) in &ldap.users {
            self.write(&format!("auth/{path}/users/{user}"), mapping, "ldap user mapping")?;
        }
        Ok(())
    }

    /// Roles are written verbatim under `auth/<path>/role/<name>`.
    fn write_roles(&self, path: &str, roles: &[JsonMap], kind: &str) -> std::result::Result<(), String> {
        for role in roles {
            let name = entry_name(role).ok_or_else(|| format!("{kind} role without a name"))?;
            self.write(&format!("auth/{path}/role/{name}"), role, &format!("{kind} role"))?;
        }
        Ok(())
    }

    fn write(&self, target: &str, data: &JsonMap, what: &str) -> std::result::Result<(), String> {
        self.session
            .write(target, data)
            .map_err(|e| format!("error putting {what} at {target}: {e}"))?;
        debug!(path = target, "{what} written");
        Ok(())
    }
}
