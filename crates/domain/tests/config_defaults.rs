use br_domain::config::{Config, ConfigSeverity, PollSettings};

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_empty());
}

#[test]
fn default_transport_values() {
    let config = Config::default();
    assert_eq!(config.transport.timeout_ms, 30_000);
    assert_eq!(config.transport.settle_delay_ms, 200);
    assert!(config.transport.endpoint_path.ends_with("/batchexecute"));
}

#[test]
fn default_conversation_capacity() {
    let config = Config::default();
    assert_eq!(config.conversation.capacity, 100);
}

#[test]
fn partial_toml_keeps_defaults() {
    let toml_str = r#"
[transport]
base_url = "http://127.0.0.1:9000"
timeout_ms = 5000
"#;
    let config = Config::from_toml_str(toml_str).unwrap();
    assert_eq!(config.transport.base_url, "http://127.0.0.1:9000");
    assert_eq!(config.transport.timeout_ms, 5000);
    assert_eq!(config.polling.sources, PollSettings::sources());
    assert_eq!(config.polling.artifacts, PollSettings::artifacts());
}

#[test]
fn polling_section_parses() {
    let toml_str = r#"
[polling.artifacts]
initial_interval_ms = 500
max_interval_ms = 4000
timeout_ms = 60000
"#;
    let config = Config::from_toml_str(toml_str).unwrap();
    assert_eq!(config.polling.artifacts.initial_interval_ms, 500);
    assert_eq!(config.polling.artifacts.timeout().as_secs(), 60);
}

#[test]
fn zero_capacity_is_an_error() {
    let toml_str = r#"
[conversation]
capacity = 0
"#;
    let config = Config::from_toml_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Error);
    assert_eq!(issues[0].field, "conversation.capacity");
}

#[test]
fn inverted_intervals_warn() {
    let toml_str = r#"
[polling.sources]
initial_interval_ms = 5000
max_interval_ms = 1000
timeout_ms = 60000
"#;
    let config = Config::from_toml_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|i| {
        i.severity == ConfigSeverity::Warning && i.field == "polling.sources.max_interval_ms"
    }));
}

#[test]
fn invalid_toml_is_config_error() {
    let err = Config::from_toml_str("[transport\nbase_url = 1").unwrap_err();
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batchrpc.toml");
    std::fs::write(&path, "[conversation]\ncapacity = 7\n").unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.conversation.capacity, 7);
}
