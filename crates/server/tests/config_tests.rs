//! Integration tests for configuration parsing
//!
//! Tests a fully populated server config and the broker it produces.

use common::SocketName;
use common::test_utils::{MockRegistry, PermissionScript, ScriptedPermissions};
use server::usb::DeviceFilter;
use server::{BrokerServer, Collaborators, LogNotifier, ServerConfig, ShutdownPolicy};
use std::sync::Arc;
use std::time::Duration;

const FULL_SERVER_CONFIG: &str = r#"
[server]
app_id = "org.example.scanner"
socket_name = "scanner-broker"
log_level = "debug"
service_mode = true
shutdown = "abort"

[security]
allowed_uids = [0, 1000]

[usb]
filters = ["0x04f9:*", "0x1234:0x5678"]
poll_interval_ms = 250
"#;

#[test]
fn test_full_server_config() {
    let config = ServerConfig::parse(FULL_SERVER_CONFIG).unwrap();

    assert_eq!(config.server.app_id, "org.example.scanner");
    assert_eq!(config.server.log_level, "debug");
    assert!(config.server.service_mode);
    assert_eq!(config.server.shutdown, ShutdownPolicy::Abort);
    assert_eq!(config.security.allowed_uids, vec![0, 1000]);
    assert_eq!(config.usb.poll_interval(), Duration::from_millis(250));

    let filters = config.usb.device_filters().unwrap();
    assert_eq!(
        filters,
        vec![
            DeviceFilter {
                vendor_id: 0x04f9,
                product_id: None
            },
            DeviceFilter {
                vendor_id: 0x1234,
                product_id: Some(0x5678)
            },
        ]
    );

    // An explicit socket name wins over the app id
    assert_eq!(config.socket(), SocketName::abstract_name("scanner-broker"));
    assert_eq!(
        config.broker_options().permission_action(),
        "scanner-broker.USB_PERMISSION"
    );
}

#[test]
fn test_config_survives_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.toml");

    let config = ServerConfig::parse(FULL_SERVER_CONFIG).unwrap();
    config.save(&path).unwrap();
    let reloaded = ServerConfig::load(Some(path)).unwrap();

    assert_eq!(reloaded.server.socket_name, config.server.socket_name);
    assert_eq!(reloaded.server.shutdown, config.server.shutdown);
    assert_eq!(reloaded.usb.filters, config.usb.filters);
}

#[tokio::test]
async fn test_broker_binds_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("broker.sock");

    let mut config = ServerConfig::default();
    config.server.socket_path = Some(socket_path.clone());

    let permissions = Arc::new(ScriptedPermissions::new(
        PermissionScript::Grant,
        Duration::ZERO,
    ));
    let server = BrokerServer::bind(
        config.broker_options(),
        Collaborators {
            registry: MockRegistry::with_grants(["dev1"], permissions.grants()),
            permissions,
            notifier: Arc::new(LogNotifier::default()),
        },
    )
    .unwrap();

    assert!(socket_path.exists());
    assert_eq!(server.socket(), &SocketName::path(&socket_path));
    assert_eq!(
        server.permission_action(),
        format!("{}.USB_PERMISSION", socket_path.display())
    );

    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.run());
    handle.shutdown();
    task.await.unwrap().unwrap();
    assert!(!socket_path.exists());
}
