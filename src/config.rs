use crate::chat::DEFAULT_MAX_HISTORY_LENGTH;
use crate::generation::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS, GenerationSettings};
use crate::settings::{DEFAULT_COLOR, DEFAULT_FONT_FAMILY, Settings};
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `STREAMCHAT_SERVER__PORT=8000`.
pub const ENV_PREFIX: &str = "STREAMCHAT";

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the generation server
    #[arg(long, env = "APISERVER_URL")]
    pub apiserver_url: Option<String>,

    /// Model identifier sent to the generation server
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub generation: GenerationSettings,
    pub chat: ChatConfig,
    pub settings: Settings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Upper bound for producing a response head; streamed bodies are not cut.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub max_history_length: usize,
    /// Sessions idle this long (no request, no listener) are dropped.
    pub session_idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
}

impl ChatConfig {
    #[must_use]
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Never zero; `tokio::time::interval` rejects a zero period.
    #[must_use]
    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs.max(1))
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Build the configuration.
    ///
    /// Priority: CLI flag (or its env var) > `STREAMCHAT_*` env > config file > defaults.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 9000)?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("generation.base_url", DEFAULT_BASE_URL)?
            .set_default("generation.model", DEFAULT_MODEL)?
            .set_default("generation.connect_timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .set_default("generation.timeout_secs", DEFAULT_TIMEOUT_SECS)?
            .set_default("generation.options.temperature", 0.7)?
            .set_default("generation.options.top_p", 0.95)?
            .set_default("generation.options.top_k", 40)?
            .set_default("chat.max_history_length", DEFAULT_MAX_HISTORY_LENGTH as u64)?
            .set_default("chat.session_idle_timeout_secs", 3600)?
            .set_default("chat.session_sweep_interval_secs", 60)?
            .set_default("settings.color", DEFAULT_COLOR)?
            .set_default("settings.font_family", DEFAULT_FONT_FAMILY)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // Flags last; clap has already folded in PORT and APISERVER_URL.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(url) = cli.apiserver_url.filter(|u| !u.trim().is_empty()) {
            builder = builder.set_override("generation.base_url", url)?;
        }
        if let Some(model) = cli.model {
            builder = builder.set_override("generation.model", model)?;
        }

        let cfg = builder.build()?;
        let app: Self = cfg.try_deserialize()?;

        app.generation
            .endpoint()
            .map_err(|e| config::ConfigError::Message(format!("generation.base_url: {e}")))?;

        Ok(app)
    }
}
