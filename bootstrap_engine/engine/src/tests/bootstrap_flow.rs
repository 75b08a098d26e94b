use std::io::Write;

use bootstrap_engine::admin::simulated::AdminCall;
use bootstrap_engine::{
    BootstrapEngine, KeyStore, MemoryKeyStore, ReconcileConfig, SimulatedServer, ThresholdConfig,
};

/// Keystore contents and server state after a full Init, Unseal, Configure run.
#[test]
fn test_full_bootstrap_flow() {
    let server = SimulatedServer::new();
    let store = MemoryKeyStore::new();
    let config: ThresholdConfig = serde_json::from_str(
        r#"{"secretShares": 5, "secretThreshold": 3, "storeRootToken": true, "initRootToken": ""}"#,
    )
    .expect("config should parse");

    let engine = BootstrapEngine::new(&store, &server, config);

    // Init
    engine.init().expect("init failed");
    assert_eq!(store.len(), 6);
    assert_eq!(server.calls(), vec![AdminCall::Init { shares: 5, threshold: 3 }]);
    assert!(engine.sealed().unwrap());

    // Unseal
    server.clear_calls();
    engine.unseal().expect("unseal failed");
    assert!(!engine.sealed().unwrap());
    assert_eq!(
        server.calls(),
        vec![
            AdminCall::Unseal { share: Some(0) },
            AdminCall::Unseal { share: Some(1) },
            AdminCall::Unseal { share: Some(2) },
        ]
    );

    // Configure, from a file the way an operator would supply it
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "policies": [{{"name": "readers", "rules": "path \"secret/*\" {{ capabilities = [\"read\"] }}"}}],
            "auth": [{{"type": "userpass", "path": "people"}}],
            "secrets": [{{"type": "kv", "path": "secret", "options": {{"version": "2"}}}}]
        }}"#
    )
    .unwrap();
    let desired = ReconcileConfig::from_json_file(file.path()).expect("desired state should parse");

    let report = engine.configure(&desired).expect("configure failed");
    assert_eq!(report.auth_enabled, vec!["people"]);
    assert_eq!(report.policies_written, vec!["readers"]);
    assert_eq!(report.secrets_mounted, vec!["secret"]);

    // Re-running every step after a restart converges without new mounts
    server.seal();
    engine.init().unwrap();
    engine.unseal().unwrap();
    server.clear_calls();
    let report = engine.configure(&desired).unwrap();
    assert!(report.auth_enabled.is_empty());
    assert!(report.secrets_mounted.is_empty());
    assert!(
        !server
            .calls()
            .iter()
            .any(|c| matches!(c, AdminCall::EnableAuth { .. } | AdminCall::Mount { .. }))
    );

    let root = store.get("root-token").unwrap();
    assert!(server.is_token_valid(&String::from_utf8_lossy(&root)));
}
