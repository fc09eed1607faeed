//! Configuration loading tests.

use std::io::Write;

use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::NamedTempFile;

use kojible::config::Config;

fn config_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

fn clear_env() {
    for var in [
        "KOJI_PROFILE",
        "KOJIBLE_CONFIG",
        "KOJIBLE_CHECK_MODE",
        "KOJIBLE_DIFF",
        "KOJIBLE_LOG_LEVEL",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
fn test_toml_config() {
    let file = config_file(
        ".toml",
        r#"
profile = "stg"

[defaults]
check_mode = true

[logging]
level = "kojible=debug"
json = true
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.profile.as_deref(), Some("stg"));
    assert!(config.defaults.check_mode);
    assert!(!config.defaults.diff_mode);
    assert_eq!(config.logging.level, "kojible=debug");
    assert!(config.logging.json);
}

#[test]
fn test_yaml_config() {
    let file = config_file(
        ".yml",
        "profile: koji\ndefaults:\n  diff_mode: true\n",
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.profile.as_deref(), Some("koji"));
    assert!(config.defaults.diff_mode);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_json_config() {
    let file = config_file(".json", r#"{"profile": "prod", "logging": {"json": true}}"#);

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.profile.as_deref(), Some("prod"));
    assert!(config.logging.json);
}

#[test]
fn test_invalid_config_reports_path() {
    let file = config_file(".toml", "profile = [not toml");

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains(&file.path().display().to_string()));
}

#[test]
#[serial]
fn test_load_explicit_path_with_env() {
    clear_env();
    let file = config_file(".toml", "[defaults]\ndiff_mode = false\n");
    std::env::set_var("KOJIBLE_DIFF", "1");
    std::env::set_var("KOJI_PROFILE", "from-env");

    let config = Config::load(Some(file.path())).unwrap();
    assert!(config.defaults.diff_mode);
    assert_eq!(config.profile.as_deref(), Some("from-env"));
    clear_env();
}

#[test]
#[serial]
fn test_file_profile_beats_env() {
    clear_env();
    let file = config_file(".toml", "profile = \"from-file\"\n");
    std::env::set_var("KOJI_PROFILE", "from-env");

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.profile.as_deref(), Some("from-file"));
    clear_env();
}

#[test]
#[serial]
fn test_kojible_config_variable() {
    clear_env();
    let file = config_file(".yaml", "profile: pointed-to\n");
    std::env::set_var("KOJIBLE_CONFIG", file.path());

    let config = Config::load(None).unwrap();
    assert_eq!(config.profile.as_deref(), Some("pointed-to"));
    clear_env();
}

#[test]
#[serial]
fn test_config_context() {
    clear_env();
    let file = config_file(".toml", "profile = \"koji\"\n[defaults]\ncheck_mode = true\n");

    let context = Config::load(Some(file.path())).unwrap().context();
    assert!(context.check_mode);
    assert_eq!(context.profile.as_deref(), Some("koji"));
    assert!(context.sessions.is_none());
}
