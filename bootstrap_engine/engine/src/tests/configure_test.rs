use std::fs;

use bootstrap_engine::admin::simulated::AdminCall;
use bootstrap_engine::types::RootToken;
use bootstrap_engine::{
    AdminApi, BootstrapEngine, BootstrapError, KeyStore, KubernetesEnv, MemoryKeyStore,
    ReconcileConfig, SimulatedServer, ThresholdConfig,
};

/// An unsealed server whose root token sits in the returned keystore.
fn ready_server() -> (SimulatedServer, MemoryKeyStore, RootToken) {
    let (server, shares, root) = SimulatedServer::preinitialized(1, 1);
    server.unseal(&shares[0]).unwrap();
    let store = MemoryKeyStore::new();
    store.set("root-token", root.as_bytes()).unwrap();
    (server, store, root)
}

fn engine<'a>(
    store: &'a MemoryKeyStore,
    server: &'a SimulatedServer,
) -> BootstrapEngine<&'a MemoryKeyStore, &'a SimulatedServer> {
    BootstrapEngine::new(store, server, ThresholdConfig::new(1, 1).unwrap())
}

fn mount_calls(server: &SimulatedServer) -> usize {
    server
        .calls()
        .iter()
        .filter(|c| matches!(c, AdminCall::EnableAuth { .. } | AdminCall::Mount { .. }))
        .count()
}

const DESIRED: &str = r#"{
    "policies": [
        {"name": "allow_secrets", "rules": "path \"secret/*\" { capabilities = [\"read\"] }"}
    ],
    "auth": [
        {"type": "github", "config": {"organization": "acme"},
         "map": {"teams": {"dev": "allow_secrets"}, "users": {"octocat": "root"}}},
        {"type": "aws", "path": "aws-prod", "config": {"access_key": "AKIA"},
         "roles": [{"name": "dev-role", "auth_type": "iam"}]},
        {"type": "ldap", "config": {"url": "ldap://ldap.example.com"},
         "groups": {"admins": {"policies": "root"}}, "users": {"alice": {"groups": "admins"}}},
        {"type": "userpass"}
    ],
    "secrets": [
        {"type": "kv", "path": "secret", "description": "General secrets.", "options": {"version": "2"}},
        {"type": "database", "configuration": {
            "config": [{"name": "pg", "plugin_name": "postgresql-database-plugin"}],
            "roles": [{"name": "readonly", "db_name": "pg"}, {"name": "writer", "db_name": "pg"}]
        }}
    ]
}"#;

#[test]
fn test_configure_applies_declared_state() {
    let (server, store, _) = ready_server();
    let desired = ReconcileConfig::from_json_str(DESIRED).unwrap();

    let report = engine(&store, &server).configure(&desired).expect("configure failed");

    assert_eq!(report.auth_enabled, vec!["github", "aws-prod", "ldap", "userpass"]);
    assert_eq!(report.secrets_mounted, vec!["secret", "database"]);
    assert!(report.skipped_immutable.is_empty());

    assert_eq!(server.auth_mounts()["aws-prod/"].kind, "aws");
    assert_eq!(server.secret_mounts()["secret/"].description, "General secrets.");
    assert_eq!(server.mount_options("secret").unwrap()["version"], "2");
    assert!(server.policies().contains_key("allow_secrets"));

    assert_eq!(server.written("auth/github/config").unwrap()["organization"], "acme");
    assert_eq!(server.written("auth/github/map/teams/dev").unwrap()["value"], "allow_secrets");
    assert_eq!(server.written("auth/github/map/users/octocat").unwrap()["value"], "root");
    assert!(server.written("auth/aws-prod/config/client").is_some());
    assert_eq!(server.written("auth/aws-prod/role/dev-role").unwrap()["auth_type"], "iam");
    assert_eq!(server.written("auth/ldap/groups/admins").unwrap()["policies"], "root");
    assert_eq!(server.written("auth/ldap/users/alice").unwrap()["groups"], "admins");
    assert_eq!(server.written("database/roles/readonly").unwrap()["db_name"], "pg");
    assert!(server.written("database/config/pg").is_some());
}

#[test]
fn test_configure_twice_issues_no_duplicate_mounts() {
    let (server, store, _) = ready_server();
    let desired = ReconcileConfig::from_json_str(DESIRED).unwrap();
    let engine = engine(&store, &server);

    engine.configure(&desired).unwrap();
    let first_run = mount_calls(&server);
    server.clear_calls();

    let report = engine.configure(&desired).unwrap();

    assert_eq!(first_run, 6);
    assert_eq!(mount_calls(&server), 0);
    assert!(report.auth_enabled.is_empty());
    assert!(report.secrets_mounted.is_empty());
    assert_eq!(report.secrets_tuned, vec!["secret", "database"]);
}

#[test]
fn test_configure_skips_immutable_entries_and_continues() {
    let (server, store, _) = ready_server();
    server.mark_immutable("database/roles/readonly");
    server.mark_immutable_structured("pki/roles/web");
    let desired = ReconcileConfig::from_json_str(
        r#"{"secrets": [
            {"type": "database", "configuration": {
                "roles": [{"name": "readonly"}, {"name": "writer"}]
            }},
            {"type": "pki", "configuration": {
                "roles": [{"name": "web"}, {"name": "internal"}]
            }}
        ]}"#,
    )
    .unwrap();

    let report = engine(&store, &server).configure(&desired).unwrap();

    assert_eq!(report.skipped_immutable, vec!["database/roles/readonly", "pki/roles/web"]);
    assert!(server.written("database/roles/writer").is_some());
    assert!(server.written("pki/roles/internal").is_some());
}

#[test]
fn test_configure_other_write_failure_aborts_pass() {
    let (server, store, _) = ready_server();
    let desired = ReconcileConfig::from_json_str(
        r#"{"secrets": [
            {"type": "database", "configuration": {"roles": [{"db_name": "pg"}]}},
            {"type": "pki"}
        ]}"#,
    )
    .unwrap();

    let err = engine(&store, &server).configure(&desired).unwrap_err();

    assert!(matches!(err, BootstrapError::SecretEngineConfig { ref path, .. } if path == "database"));
    assert!(!server.secret_mounts().contains_key("pki/"));
}

#[test]
fn test_configure_leaves_matching_auth_mount_alone() {
    let (server, store, _) = ready_server();
    server.add_auth_mount("github", "github");
    let desired = ReconcileConfig::from_json_str(r#"{"auth": [{"type": "github"}]}"#).unwrap();

    let report = engine(&store, &server).configure(&desired).unwrap();

    assert!(report.auth_enabled.is_empty());
    assert!(server.written("auth/github/config").is_some());
}

#[test]
fn test_configure_type_mismatch_at_auth_path_fails() {
    let (server, store, _) = ready_server();
    server.add_auth_mount("github", "userpass");
    let desired = ReconcileConfig::from_json_str(r#"{"auth": [{"type": "github"}]}"#).unwrap();

    let err = engine(&store, &server).configure(&desired).unwrap_err();

    assert!(matches!(err, BootstrapError::AuthConfig { ref path, .. } if path == "github"));
    assert_eq!(server.auth_mounts()["github/"].kind, "userpass");
}

#[test]
fn test_configure_kubernetes_reads_service_account() {
    let (server, store, _) = ready_server();
    let dir = tempfile::tempdir().unwrap();
    let ca = dir.path().join("ca.crt");
    let token = dir.path().join("token");
    fs::write(&ca, "-----BEGIN CERTIFICATE-----").unwrap();
    fs::write(&token, "reviewer.jwt").unwrap();

    let desired = ReconcileConfig::from_json_str(
        r#"{"auth": [{"type": "kubernetes", "path": "k8s",
            "roles": [{"name": "default", "bound_service_account_names": "default", "policies": "allow_secrets"}]}]}"#,
    )
    .unwrap();

    engine(&store, &server)
        .with_kubernetes_env(KubernetesEnv {
            ca_cert_path: ca,
            token_path: token,
            service_host: "10.0.0.1".into(),
        })
        .configure(&desired)
        .unwrap();

    let config = server.written("auth/k8s/config").unwrap();
    assert_eq!(config["kubernetes_host"], "https://10.0.0.1");
    assert_eq!(config["kubernetes_ca_cert"], "-----BEGIN CERTIFICATE-----");
    assert_eq!(config["token_reviewer_jwt"], "reviewer.jwt");
    assert_eq!(server.written("auth/k8s/role/default").unwrap()["policies"], "allow_secrets");
}

#[test]
fn test_configure_kubernetes_without_service_account_fails() {
    let (server, store, _) = ready_server();
    let dir = tempfile::tempdir().unwrap();
    let desired =
        ReconcileConfig::from_json_str(r#"{"auth": [{"type": "kubernetes"}]}"#).unwrap();

    let err = engine(&store, &server)
        .with_kubernetes_env(KubernetesEnv {
            ca_cert_path: dir.path().join("missing-ca.crt"),
            token_path: dir.path().join("missing-token"),
            service_host: String::new(),
        })
        .configure(&desired)
        .unwrap_err();

    assert!(matches!(err, BootstrapError::AuthConfig { ref kind, .. } if kind == "kubernetes"));
}

#[test]
fn test_configure_without_stored_root_token_fails_before_any_call() {
    let (server, _, _) = ready_server();
    let empty = MemoryKeyStore::new();

    let err = engine(&empty, &server)
        .configure(&ReconcileConfig::default())
        .unwrap_err();

    assert!(matches!(err, BootstrapError::KeyStore(_)));
    assert!(server.calls().is_empty());
}

#[test]
fn test_configure_with_revoked_root_token_is_a_policy_error() {
    let (server, store, root) = ready_server();
    server.revoke_self(&root).unwrap();
    let desired = ReconcileConfig::from_json_str(
        r#"{"policies": [{"name": "p", "rules": "path \"x\" {}"}]}"#,
    )
    .unwrap();

    let err = engine(&store, &server).configure(&desired).unwrap_err();
    assert!(matches!(err, BootstrapError::PolicyConfig { ref name, .. } if name == "p"));
}

#[test]
fn test_configure_tunes_existing_mount_with_new_options() {
    let (server, store, _) = ready_server();
    let engine = engine(&store, &server);
    let declared = |ttl: &str| {
        ReconcileConfig::from_json_str(&format!(
            r#"{{"secrets": [{{"type": "kv", "path": "secret", "options": {{"version": "2", "max_versions": "{ttl}"}}}}]}}"#
        ))
        .unwrap()
    };

    engine.configure(&declared("5")).unwrap();
    assert_eq!(server.mount_options("secret").unwrap()["max_versions"], "5");

    server.clear_calls();
    let report = engine.configure(&declared("10")).unwrap();

    assert_eq!(report.secrets_tuned, vec!["secret"]);
    assert_eq!(server.calls(), vec![AdminCall::TuneMount { path: "secret".into() }]);
    let options = server.mount_options("secret").unwrap();
    assert_eq!(options["max_versions"], "10");
    assert_eq!(options["version"], "2");
}

#[test]
fn test_configure_mount_carries_plugin_and_description() {
    let (server, store, _) = ready_server();
    let desired = ReconcileConfig::from_json_str(
        r#"{"secrets": [{"type": "plugin", "path": "custom-db", "plugin_name": "acme-db-plugin",
            "description": "Database credentials from the acme plugin."}]}"#,
    )
    .unwrap();

    engine(&store, &server).configure(&desired).unwrap();

    let mount = &server.secret_mounts()["custom-db/"];
    assert_eq!(mount.kind, "plugin");
    assert_eq!(mount.description, "Database credentials from the acme plugin.");
    assert_eq!(server.mount_plugin("custom-db").as_deref(), Some("acme-db-plugin"));
}

#[test]
fn test_configure_applies_categories_in_declared_order() {
    let (server, store, _) = ready_server();
    let desired = ReconcileConfig::from_json_str(
        r#"{"secrets": [{"type": "pki", "configuration": {
            "root/generate": [{"name": "internal", "common_name": "example.internal"}],
            "config": [{"name": "urls"}],
            "roles": [{"name": "web"}]
        }}]}"#,
    )
    .unwrap();

    engine(&store, &server).configure(&desired).unwrap();

    let writes: Vec<String> = server
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            AdminCall::Write { path } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec!["pki/root/generate/internal", "pki/config/urls", "pki/roles/web"]);
}
