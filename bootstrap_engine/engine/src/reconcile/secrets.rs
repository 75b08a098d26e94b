use tracing::{debug, info, warn};

use crate::admin::AdminApi;
use crate::config::SecretEngineSpec;
use crate::error::{BootstrapError, Result};
use crate::reconcile::{ReconcileReport, Reconciler, entry_name};
use crate::types::{MountInput, mount_key};

impl<A: AdminApi + ?Sized> Reconciler<'_, '_, A> {
    /// Mount the engine if its path is free, otherwise tune its options, then
    /// write each nested configuration entry to `path/category/name`.
    ///
    /// Type, path and plugin are fixed once mounted; only `options` is
    /// re-applied to an existing mount.
    pub(super) fn configure_secret_engine(
        &self,
        engine: &SecretEngineSpec,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let path = engine.mount_path();
        let fail = |message: String| BootstrapError::SecretEngineConfig {
            path: path.to_string(),
            message,
        };

        let mounts = self
            .session
            .list_mounts()
            .map_err(|e| fail(format!("error reading mounts: {e}")))?;

        if mounts.contains_key(&mount_key(path)) {
            self.session
                .tune_mount(path, &engine.options)
                .map_err(|e| fail(format!("error tuning mount: {e}")))?;
            debug!(path, "secret engine already mounted, options tuned");
            report.secrets_tuned.push(path.to_string());
        } else {
            let input = MountInput {
                kind: engine.kind.clone(),
                description: engine.description.clone(),
                plugin_name: engine.plugin_name.clone(),
                options: engine.options.clone(),
            };
            self.session
                .mount(path, &input)
                .map_err(|e| fail(format!("error mounting {}: {e}", engine.kind)))?;
            info!(kind = %engine.kind, path, "secret engine mounted");
            report.secrets_mounted.push(path.to_string());
        }

        for (category, entries) in &engine.configuration {
            for entry in entries {
                let name = entry_name(entry)
                    .ok_or_else(|| fail(format!("{category} configuration entry without a name")))?;
                let config_path = format!("{path}/{category}/{name}");

                match self.session.write(&config_path, entry) {
                    Ok(()) => debug!(path = %config_path, "secret engine configuration written"),
                    Err(e) if e.is_immutable_config() => {
                        warn!(path = %config_path, error = %e, "can't reconfigure, please delete it manually");
                        report.skipped_immutable.push(config_path);
                    }
                    Err(e) => {
                        return Err(fail(format!("error putting {config_path} config: {e}")));
                    }
                }
            }
        }

        Ok(())
    }
}
