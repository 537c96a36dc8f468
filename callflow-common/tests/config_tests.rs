//! Integration tests for configuration resolution
//!
//! Tests that set CALLFLOW_* variables are marked #[serial] so they do not
//! race each other on the shared process environment.

use callflow_common::config::{Config, SignatureScheme, CONFIG_ENV_VAR};
use callflow_common::Error;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_explicit_file() {
    env::remove_var("CALLFLOW_WEBHOOK_SECRET");
    let file = write_config(
        r#"
        [server]
        port = 6001

        [webhook]
        secret = "from-file"
        target_lines = ["100"]

        [pipeline]
        intake_stage_id = "new-leads"
        dedup_window_secs = 1800

        [provider]
        app_id = "app"
        secret = "provider-secret"
        signature = "md5"

        [ai]
        api_key = "sk-file"
        auto_transcribe = true
        "#,
    );

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.server.port, 6001);
    assert_eq!(config.webhook.secret.as_deref(), Some("from-file"));
    assert_eq!(config.pipeline.intake_stage_id, "new-leads");
    assert_eq!(config.pipeline.dedup_window().num_seconds(), 1800);
    assert_eq!(config.provider.signature, SignatureScheme::Md5);
    assert!(config.provider.has_credentials());
    assert!(config.ai.auto_transcribe && config.ai.has_credentials());
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    let file = write_config(
        r#"
        [webhook]
        secret = "from-file"
        "#,
    );

    env::set_var("CALLFLOW_WEBHOOK_SECRET", "from-env");
    let config = Config::load(Some(file.path()));
    env::remove_var("CALLFLOW_WEBHOOK_SECRET");

    assert_eq!(config.unwrap().webhook.secret.as_deref(), Some("from-env"));
}

#[test]
#[serial]
fn test_config_env_var_names_file() {
    let file = write_config(
        r#"
        [logging]
        level = "debug"
        "#,
    );

    env::set_var(CONFIG_ENV_VAR, file.path());
    let config = Config::load(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.unwrap().logging.level, "debug");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    let result = Config::load(Some(std::path::Path::new("/nonexistent/callflow.toml")));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_invalid_toml_is_error() {
    let file = write_config("[server\nport = ");
    let result = Config::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Parse TOML failed")));
}

#[test]
#[serial]
fn test_invalid_values_rejected() {
    let file = write_config(
        r#"
        [pipeline]
        dedup_window_secs = 0
        "#,
    );
    let result = Config::load(Some(file.path()));
    assert!(matches!(result, Err(Error::Config(_))));
}
