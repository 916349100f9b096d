use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use streamchat::config::AppConfig;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("STREAMCHAT_SERVER__PORT");
        env::remove_var("STREAMCHAT_CHAT__MAX_HISTORY_LENGTH");
        env::remove_var("STREAMCHAT_GENERATION__MODEL");
        env::remove_var("APISERVER_URL");
        env::remove_var("CONFIG_FILE");
        env::remove_var("PORT");
    }
}

// Clap would otherwise parse the test harness arguments.
fn load() -> Result<AppConfig, config::ConfigError> {
    AppConfig::load_from_args(["streamchat"])
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load().expect("defaults should load");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.generation.base_url, "http://localhost:3335");
    assert_eq!(config.generation.model, "mistral:7b");
    assert_eq!(config.generation.connect_timeout_secs, 30);
    assert_eq!(config.generation.timeout_secs, 30);
    assert_eq!(config.generation.options.top_k, 40);
    assert!((config.generation.options.temperature - 0.7).abs() < f64::EPSILON);
    assert_eq!(config.chat.max_history_length, 20);
    assert_eq!(config.chat.session_idle_timeout_secs, 3600);
    assert_eq!(config.chat.session_sweep_interval_secs, 60);
    assert_eq!(config.settings.color, "violet");
    assert_eq!(config.settings.font_family, "Poppins");
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("STREAMCHAT_SERVER__PORT", "9090");
        env::set_var("STREAMCHAT_CHAT__MAX_HISTORY_LENGTH", "5");
        env::set_var("STREAMCHAT_GENERATION__MODEL", "llama3");
    }

    let config = load().expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.chat.max_history_length, 5);
    assert_eq!(config.generation.model, "llama3");

    clear_env_vars();
}

#[test]
#[serial]
fn test_apiserver_url_override() {
    clear_env_vars();
    unsafe {
        env::set_var("APISERVER_URL", "http://gpu-box:11434");
    }

    let config = load().expect("Failed to load config");
    assert_eq!(config.generation.base_url, "http://gpu-box:11434");
    assert_eq!(
        config.generation.endpoint().unwrap().as_str(),
        "http://gpu-box:11434/api/generate"
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_invalid_apiserver_url_is_rejected() {
    clear_env_vars();
    unsafe {
        env::set_var("APISERVER_URL", "not a url");
    }

    assert!(load().is_err());

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_flag_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("STREAMCHAT_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args(["streamchat", "--port", "7171"])
        .expect("Failed to load config");
    assert_eq!(config.server.port, 7171);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    write!(
        file,
        r#"
server:
  port: 7070
generation:
  base_url: "http://models.lan:3335"
  timeout_secs: 90
chat:
  session_idle_timeout_secs: 120
settings:
  color: teal
"#
    )
    .expect("Failed to write temp config");

    // Tell AppConfig to use this file via Env Var (mocking CLI arg indirectly)
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let config = load().expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.generation.base_url, "http://models.lan:3335");
    assert_eq!(config.generation.timeout_secs, 90);
    assert_eq!(config.generation.connect_timeout_secs, 30);
    assert_eq!(config.chat.session_idle_timeout_secs, 120);
    assert_eq!(config.chat.session_sweep_interval_secs, 60);
    assert_eq!(config.settings.color, "teal");
    assert_eq!(config.settings.font_family, "Poppins");

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args(["streamchat", "--config", "/nonexistent/streamchat.yaml"]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    let config_content = r#"
server:
  port: 6060
    "#;
    let cwd_path = "config.yaml";
    fs::write(cwd_path, config_content).expect("Failed to write ./config.yaml");

    let result = load();

    fs::remove_file(cwd_path).unwrap();

    let config = result.expect("Failed to load config");
    assert_eq!(config.server.port, 6060);
}
