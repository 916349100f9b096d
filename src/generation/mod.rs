//! Generation server client.
//!
//! The chat controller never talks HTTP directly; it asks a
//! [`GenerationClient`] for a stream of text fragments. The production
//! implementation is [`OllamaClient`], which speaks the Ollama-style
//! `/api/generate` protocol (newline-delimited JSON chunks).
//!
//! # Example
//!
//! ```rust,ignore
//! use streamchat::generation::{GenerationClient, GenerationSettings, OllamaClient};
//!
//! let client = OllamaClient::new(GenerationSettings::default())?;
//! let mut fragments = client.generate("hola").await?;
//! ```

pub mod ollama;

pub use ollama::{Frame, LineDecoder, OllamaClient};

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default generation server base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3335";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "mistral:7b";

/// Default connect and total timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Sampling parameters forwarded to the generation server as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Top-k sampling cutoff.
    pub top_k: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

/// Connection and model settings for the generation server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerationSettings {
    /// Base URL, without the `/api/generate` suffix.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds, covering the whole streamed body.
    pub timeout_secs: u64,
    /// Sampling options.
    #[serde(default)]
    pub options: SamplingOptions,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            connect_timeout_secs: DEFAULT_TIMEOUT_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            options: SamplingOptions::default(),
        }
    }
}

impl GenerationSettings {
    /// Resolve the full `/api/generate` endpoint.
    ///
    /// A path prefix on the base URL is preserved, so
    /// `http://host/ollama` becomes `http://host/ollama/api/generate`.
    pub fn endpoint(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(self.base_url.trim())?;
        let path = format!("{}/api/generate", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub model: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<SamplingOptions>,
}

/// Failures that end a generation request.
///
/// Every variant is a transport-class failure from the conversation's
/// point of view. Malformed chunks are not errors; they degrade to text.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Connection, timeout or body read failure.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("generation server returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The server reported an error inside the stream.
    #[error("generation server error: {0}")]
    Server(String),

    /// The configured base URL is not a valid URL.
    #[error("invalid generation URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Stream of text fragments for one generation request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// A streaming text-generation backend.
#[async_trait::async_trait]
pub trait GenerationClient: Send + Sync {
    /// Start generating a reply to `prompt`.
    ///
    /// Resolves once the response head has arrived; fragments are then
    /// pulled from the returned stream.
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_default() {
        let settings = GenerationSettings::default();
        assert_eq!(
            settings.endpoint().unwrap().as_str(),
            "http://localhost:3335/api/generate"
        );
    }

    #[test]
    fn test_endpoint_keeps_prefix() {
        let settings = GenerationSettings {
            base_url: "https://gpu.internal/ollama/".to_string(),
            ..GenerationSettings::default()
        };
        assert_eq!(
            settings.endpoint().unwrap().as_str(),
            "https://gpu.internal/ollama/api/generate"
        );
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        let settings = GenerationSettings {
            base_url: "not a url".to_string(),
            ..GenerationSettings::default()
        };
        assert!(settings.endpoint().is_err());
    }

    #[test]
    fn test_request_serialization() {
        let req = GenerateRequest {
            prompt: "hi".to_string(),
            model: DEFAULT_MODEL.to_string(),
            stream: true,
            options: Some(SamplingOptions::default()),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["prompt"], "hi");
        assert_eq!(json["model"], "mistral:7b");
        assert_eq!(json["stream"], true);
        assert_eq!(json["options"]["top_k"], 40);
        assert_eq!(json["options"]["top_p"], 0.95);
    }

    #[test]
    fn test_request_without_options() {
        let req = GenerateRequest {
            prompt: "hi".to_string(),
            model: "m".to_string(),
            stream: true,
            options: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("options").is_none());
    }
}
