//! Ollama-style `/api/generate` streaming client.
//!
//! The server streams one JSON object per line, each carrying a `response`
//! text fragment. Anything that is not a JSON object is passed through as
//! literal text so a misbehaving server degrades instead of failing.

use futures::StreamExt;
use serde_json::Value;
use url::Url;

use super::{
    FragmentStream, GenerateRequest, GenerationClient, GenerationError, GenerationSettings,
};

/// One decoded line of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text to append to the answer.
    Text(String),
    /// The server reported an error in-band.
    Error(String),
}

/// Splits a byte stream into lines and decodes each one.
///
/// Splitting happens on raw bytes, so a multi-byte character cut across
/// two network chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and return every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.drain(..=pos).collect::<Vec<_>>();
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        decode_line(&line)
    }
}

/// Decode a single line, newline included.
fn decode_line(raw: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(raw);
    // Keep-alive blank lines carry nothing.
    if text.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(obj)) => {
            if let Some(message) = obj.get("error").and_then(Value::as_str) {
                return Some(Frame::Error(message.to_string()));
            }
            obj.get("response")
                .and_then(Value::as_str)
                .map(|s| Frame::Text(s.to_string()))
        }
        // Not a structured chunk: keep the raw text, line break and all.
        _ => Some(Frame::Text(text.into_owned())),
    }
}

/// Streaming client for an Ollama-compatible generation server.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: Url,
    settings: GenerationSettings,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.settings.model)
            .finish()
    }
}

impl OllamaClient {
    /// Build a client with the configured connect and total timeouts.
    pub fn new(settings: GenerationSettings) -> Result<Self, GenerationError> {
        let endpoint = settings.endpoint()?;
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint,
            settings,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl GenerationClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let body = GenerateRequest {
            prompt: prompt.to_string(),
            model: self.settings.model.clone(),
            stream: true,
            options: Some(self.settings.options),
        };

        tracing::debug!(
            name: "generation.request",
            endpoint = %self.endpoint,
            model = %self.settings.model,
            prompt_chars = prompt.chars().count(),
            "Sending generation request"
        );

        let resp = self.http.post(self.endpoint.clone()).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
            });
        }

        let byte_stream = resp.bytes_stream();

        let out = async_stream::stream! {
            let mut decoder = LineDecoder::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(GenerationError::Transport(e));
                        return;
                    }
                };

                for frame in decoder.push(&chunk) {
                    match frame {
                        Frame::Text(text) => yield Ok(text),
                        Frame::Error(message) => {
                            yield Err(GenerationError::Server(message));
                            return;
                        }
                    }
                }
            }

            match decoder.finish() {
                Some(Frame::Text(text)) => yield Ok(text),
                Some(Frame::Error(message)) => yield Err(GenerationError::Server(message)),
                None => {}
            }
        };

        Ok(Box::pin(out))
    }
}
