use service_router::renderer::CacheScope;
use service_router::ServerConfig;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
listen_address: "127.0.0.1:8081"
services_file: "/etc/router/services.yaml"
control_key: "k3y"
swallow_generator_errors: false
expires_secs: 60
render_param_prefix: "tpl."
template_cache_scope: global
enable_compression: false
log_level: debug
metrics_endpoint:
  enabled: true
  address: "127.0.0.1:9191"
"#,
    );

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.listen_address, "127.0.0.1:8081");
    assert_eq!(config.services_file, "/etc/router/services.yaml");
    assert_eq!(config.control_key(), Some("k3y"));
    assert!(!config.swallow_generator_errors);
    assert_eq!(config.expires_secs, 60);
    assert_eq!(config.render_param_prefix, "tpl.");
    assert_eq!(config.template_cache_scope, CacheScope::Global);
    assert!(!config.enable_compression);
    assert_eq!(config.tracing_level().unwrap(), tracing::Level::DEBUG);

    let metrics = config.metrics_endpoint.unwrap();
    assert!(metrics.enabled);
    assert_eq!(metrics.address, "127.0.0.1:9191");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let file = write_config("services_file: services.yaml\n");
    let config = ServerConfig::from_file(file.path()).unwrap();
    let defaults = ServerConfig::default();

    assert_eq!(config.listen_address, defaults.listen_address);
    assert_eq!(config.control_key(), None);
    assert!(config.swallow_generator_errors);
    assert!(config.enable_compression);
    assert_eq!(config.template_cache_scope, CacheScope::Service);
    assert!(config.metrics_endpoint.is_none());
}

#[test]
fn test_invalid_configs_are_rejected() {
    for content in [
        "listen_address: \"not an address\"\n",
        "services_file: \"  \"\n",
        "log_level: chatty\n",
        "template_cache_scope: planet\n",
        "metrics_endpoint:\n  enabled: true\n  address: nowhere\n",
        "expires_secs: [1, 2]\n",
    ] {
        let file = write_config(content);
        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(err.is_config_error(), "{}: {}", content, err);
    }
}

#[test]
fn test_disabled_metrics_endpoint_is_not_validated() {
    let file = write_config("metrics_endpoint:\n  enabled: false\n  address: nowhere\n");
    assert!(ServerConfig::from_file(file.path()).is_ok());
}

#[test]
fn test_nonexistent_file() {
    let err = ServerConfig::from_file("/nonexistent/router.yaml").unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("Failed to read config file"));
}
