//! Client for the local generative model service.
//!
//! The service speaks the Ollama HTTP protocol: `POST /api/generate` with
//! `{model, prompt, stream: false}` answers with the generated text under
//! `response`, and `GET /api/tags` lists the installed models.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Timeout for the model-listing request.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Upper bound for one generation request, body included.
    pub timeout: Duration,
}

impl LlmConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("{0}")]
    Transport(reqwest::Error),

    #[error("model service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed model response: {0}")]
    Body(String),
}

impl LlmError {
    /// Text recorded in place of a narrative when generation fails.
    pub fn surrogate(&self) -> String {
        match self {
            Self::Timeout { secs } => {
                format!("Error: model request timed out after {secs}s.")
            }
            other => format!("Error connecting to model service: {other}"),
        }
    }
}

/// Anything that turns a prompt into text.
pub trait Generator {
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).generate(prompt)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
}

/// Blocking client for one configured model.
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Transport)?;
        Ok(Self { client, config })
    }

    fn classify(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                secs: self.config.timeout.as_secs(),
            }
        } else {
            LlmError::Transport(err)
        }
    }
}

impl Generator for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        debug!(model = %self.config.model, chars = prompt.len(), "sending generation request");
        let response = self
            .client
            .post(self.config.endpoint("api/generate"))
            .json(&request)
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().map_err(|e| self.classify(e))?;
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::Body(e.to_string()))?;
        Ok(parsed.response)
    }
}

/// Result of probing the model service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub service_reachable: bool,
    pub model_present: bool,
    /// Model names reported by the service.
    pub models: Vec<String>,
}

/// Probe the model-listing endpoint. Never fails: any problem reads as
/// an unreachable service.
pub fn check_health(config: &LlmConfig) -> HealthStatus {
    let Ok(client) = Client::builder().timeout(HEALTH_TIMEOUT).build() else {
        return HealthStatus::default();
    };

    let response = match client.get(config.endpoint("api/tags")).send() {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            debug!(status = %r.status(), "model listing returned an error status");
            return HealthStatus::default();
        }
        Err(e) => {
            debug!(error = %e, "model service unreachable");
            return HealthStatus::default();
        }
    };

    let models: Vec<String> = response
        .text()
        .ok()
        .and_then(|body| serde_json::from_str::<TagsResponse>(&body).ok())
        .map(|tags| tags.models.into_iter().map(|m| m.name).collect())
        .unwrap_or_default();

    HealthStatus {
        service_reachable: true,
        model_present: model_listed(&config.model, &models),
        models,
    }
}

/// A listed name matches when it equals the configured model or extends
/// it with a tag (`llama3.2` matches `llama3.2:latest`).
pub fn model_listed(model: &str, listed: &[String]) -> bool {
    listed
        .iter()
        .any(|name| name == model || name.starts_with(model))
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::{TcpListener, TcpStream},
        thread,
    };

    use super::*;

    /// Serve exactly one request with `respond`, returning the base URL and
    /// a handle yielding the raw request body.
    fn serve_once(
        respond: impl FnOnce(&mut TcpStream) + Send + 'static,
    ) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let body = read_request(&stream);
            respond(&mut stream);
            body
        });
        (base, handle)
    }

    fn read_request(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                content_length = value.trim().parse().unwrap();
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();
        String::from_utf8(body).unwrap()
    }

    fn reply(stream: &mut TcpStream, status: &str, body: &str) {
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .unwrap();
    }

    fn config(base_url: &str, timeout: Duration) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: "llama3.2:3b".to_string(),
            timeout,
        }
    }

    #[test]
    fn generate_posts_prompt_and_reads_response_field() {
        let (base, handle) = serve_once(|s| {
            reply(s, "200 OK", r#"{"model":"llama3.2:3b","response":"Summary: fine","done":true}"#)
        });
        let client = OllamaClient::new(config(&format!("{base}/"), Duration::from_secs(5))).unwrap();

        let text = client.generate("compare these").unwrap();
        assert_eq!(text, "Summary: fine");

        let sent: serde_json::Value = serde_json::from_str(&handle.join().unwrap()).unwrap();
        assert_eq!(sent["model"], "llama3.2:3b");
        assert_eq!(sent["prompt"], "compare these");
        assert_eq!(sent["stream"], false);
    }

    #[test]
    fn missing_response_field_is_empty_text() {
        let (base, _handle) = serve_once(|s| reply(s, "200 OK", r#"{"done":true}"#));
        let client = OllamaClient::new(config(&base, Duration::from_secs(5))).unwrap();
        assert_eq!(client.generate("p").unwrap(), "");
    }

    #[test]
    fn non_success_status_is_reported() {
        let (base, _handle) =
            serve_once(|s| reply(s, "404 Not Found", r#"{"error":"model not found"}"#));
        let client = OllamaClient::new(config(&base, Duration::from_secs(5))).unwrap();

        let err = client.generate("p").unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 404, .. }));
        assert!(err.surrogate().starts_with("Error connecting to model service:"));
    }

    #[test]
    fn slow_service_times_out() {
        let (base, _handle) = serve_once(|s| {
            thread::sleep(Duration::from_secs(3));
            let _ = s.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}");
        });
        let client = OllamaClient::new(config(&base, Duration::from_secs(1))).unwrap();

        let err = client.generate("p").unwrap_err();
        assert!(matches!(err, LlmError::Timeout { secs: 1 }));
        assert_eq!(err.surrogate(), "Error: model request timed out after 1s.");
    }

    #[test]
    fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = OllamaClient::new(config(&base, Duration::from_secs(2))).unwrap();
        let err = client.generate("p").unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }

    #[test]
    fn health_reports_listed_model() {
        let (base, _handle) = serve_once(|s| {
            reply(s, "200 OK", r#"{"models":[{"name":"mistral:7b"},{"name":"llama3.2:3b"}]}"#)
        });
        let status = check_health(&config(&base, Duration::from_secs(5)));
        assert!(status.service_reachable);
        assert!(status.model_present);
        assert_eq!(status.models.len(), 2);
    }

    #[test]
    fn health_unreachable_service() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let status = check_health(&config(&base, Duration::from_secs(5)));
        assert_eq!(status, HealthStatus::default());
    }

    #[test]
    fn model_matching_accepts_tag_suffix() {
        let listed = vec!["llama3.2:latest".to_string(), "phi3:mini".to_string()];
        assert!(model_listed("llama3.2", &listed));
        assert!(model_listed("phi3:mini", &listed));
        assert!(!model_listed("llama3.2:3b", &listed));
        assert!(!model_listed("mistral", &[]));
    }
}
