//! Bootstrap Engine Core Library
//!
//! Initializes a sharded-secret server, unseals it from shares held in an
//! external keystore, and reconciles its auth methods, policies and secret
//! engines against a declarative description.

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod reconcile;
pub mod types;
pub mod utils;

pub use admin::{AdminApi, HttpAdminClient, HttpAdminConfig, RootSession, SimulatedServer};
pub use bootstrap::BootstrapEngine;
pub use config::{KubernetesEnv, ReconcileConfig, ThresholdConfig, UnsealWait};
pub use error::{AdminError, BootstrapError, KeyStoreError, Result};
pub use keystore::{KeyStore, MemoryKeyStore};
pub use logging::{LogSettings, init_logging};
pub use reconcile::ReconcileReport;
