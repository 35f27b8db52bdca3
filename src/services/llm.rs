use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "http://127.0.0.1:1234/v1";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "ollama" or "openai"
    pub model: String,
    /// Overridden by `OLLAMA_HOST` / `OPENAI_BASE_URL` when set.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// Pause between successive generation calls.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_timeout() -> u64 {
    600
}
fn default_retry_delay() -> u64 {
    10
}
fn default_request_delay() -> u64 {
    500
}

impl LlmConfig {
    pub fn env_var(&self) -> &'static str {
        match self.provider.as_str() {
            "openai" => OPENAI_BASE_URL_ENV,
            _ => OLLAMA_HOST_ENV,
        }
    }

    pub fn base_url(&self) -> Result<String, GenerationError> {
        self.base_url_with(std::env::var(self.env_var()).ok())
    }

    /// Environment value first, then the configured address, then the provider default.
    pub fn base_url_with(&self, env_value: Option<String>) -> Result<String, GenerationError> {
        let default = match self.provider.as_str() {
            "openai" => DEFAULT_OPENAI_URL,
            _ => DEFAULT_OLLAMA_URL,
        };
        let raw = env_value
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.base_url.clone().filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| default.to_string());
        check_base_url(&raw)
    }
}

/// Accepts `host:port` without a scheme, as `OLLAMA_HOST` commonly is.
pub fn check_base_url(raw: &str) -> Result<String, GenerationError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| GenerationError::InvalidConfig(format!("bad base url `{}`: {}", raw, e)))?;
    if url.host_str().is_none() {
        return Err(GenerationError::InvalidConfig(format!(
            "base url `{}` has no host",
            raw
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation service at {base_url} is unreachable: {source}")]
    Unavailable {
        base_url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("model `{model}` is not available. {hint}")]
    ModelMissing { model: String, hint: String },
    #[error("unexpected http status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("service returned an empty response")]
    Empty,
    #[error("invalid llm configuration: {0}")]
    InvalidConfig(String),
}

impl GenerationError {
    fn from_request(base_url: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            GenerationError::Unavailable {
                base_url: base_url.to_string(),
                source: err,
            }
        } else {
            GenerationError::Malformed(err.to_string())
        }
    }

    /// Errors worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Unavailable { .. } | GenerationError::Empty => true,
            GenerationError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError>;

    /// Fails when the service is down or the model is not provisioned.
    async fn ensure_ready(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>, GenerationError> {
    if config.model.trim().is_empty() {
        return Err(GenerationError::InvalidConfig(
            "llm.model must not be empty".to_string(),
        ));
    }
    let base_url = config.base_url()?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
        .build()
        .map_err(|e| GenerationError::InvalidConfig(e.to_string()))?;

    let inner: Box<dyn LlmClient> = match config.provider.as_str() {
        "ollama" => Box::new(OllamaClient::new(client, &base_url, &config.model)),
        "openai" => Box::new(OpenAIClient::new(
            client,
            &base_url,
            &config.model,
            config.api_key.as_deref(),
        )),
        other => {
            return Err(GenerationError::InvalidConfig(format!(
                "Unknown LLM provider: {}",
                other
            )))
        }
    };

    if config.retry_count == 0 {
        Ok(inner)
    } else {
        Ok(Box::new(RetryingClient::new(
            inner,
            config.retry_count,
            Duration::from_secs(config.retry_delay_seconds),
        )))
    }
}

// --- Ollama ---
#[derive(Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        }
    }

    fn missing(&self) -> GenerationError {
        GenerationError::ModelMissing {
            model: self.model.clone(),
            hint: format!("Provision it with `ollama pull {}`.", self.model),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

/// `llama3` matches `llama3:latest`; a tagged name must match exactly.
fn ollama_has_model(tags: &OllamaTags, model: &str) -> bool {
    tags.models.iter().any(|m| {
        m.name == model || (!model.contains(':') && m.name == format!("{}:latest", model))
    })
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions { temperature },
        };

        debug!("POST {} ({} prompt chars)", url, prompt.len());
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::from_request(&self.base_url, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::from_request(&self.base_url, e))?;

        if status == StatusCode::NOT_FOUND {
            return Err(self.missing());
        }
        if !status.is_success() {
            return Err(GenerationError::Status { status, body: text });
        }

        let parsed: OllamaResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("{}. Body: {}", e, text)))?;
        if let Some(err) = parsed.error {
            return Err(GenerationError::Malformed(err));
        }
        if parsed.response.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(parsed.response)
    }

    async fn ensure_ready(&self) -> Result<(), GenerationError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GenerationError::from_request(&self.base_url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }
        let tags: OllamaTags = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        if ollama_has_model(&tags, &self.model) {
            Ok(())
        } else {
            Err(self.missing())
        }
    }
}

// --- OpenAI-compatible (LM Studio, llama.cpp server, vLLM) ---

#[derive(Debug)]
pub struct OpenAIClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIModels {
    #[serde(default)]
    data: Vec<OpenAIModel>,
}

#[derive(Deserialize)]
struct OpenAIModel {
    id: String,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAIRequest {
            model: &self.model,
            messages: vec![OpenAIMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        let resp = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::from_request(&self.base_url, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::from_request(&self.base_url, e))?;
        if !status.is_success() {
            return Err(GenerationError::Status { status, body: text });
        }

        let result: OpenAIResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("{}. Body: {}", e, text)))?;
        match result.choices.first().and_then(|c| c.message.content.clone()) {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(GenerationError::Empty),
        }
    }

    async fn ensure_ready(&self) -> Result<(), GenerationError> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| GenerationError::from_request(&self.base_url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }
        let models: OpenAIModels = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        if models.data.iter().any(|m| m.id == self.model) {
            Ok(())
        } else {
            Err(GenerationError::ModelMissing {
                model: self.model.clone(),
                hint: "Load it in the serving application before running.".to_string(),
            })
        }
    }
}

// --- Retry decorator ---

#[derive(Debug)]
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retries: usize,
    delay: Duration,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retries: usize, delay: Duration) -> Self {
        Self {
            inner,
            retries,
            delay,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(prompt, temperature).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!("Generation failed ({}), retry {}/{}", e, attempt, self.retries);
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn ensure_ready(&self) -> Result<(), GenerationError> {
        self.inner.ensure_ready().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn config(provider: &str, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: "llama3".to_string(),
            base_url: base_url.map(str::to_string),
            api_key: None,
            timeout_seconds: 30,
            retry_count: 0,
            retry_delay_seconds: 0,
            request_delay_ms: 0,
        }
    }

    #[test]
    fn test_base_url_precedence() {
        let cfg = config("ollama", Some("http://gpu-box:11434/"));
        assert_eq!(cfg.base_url_with(None).unwrap(), "http://gpu-box:11434");
        assert_eq!(
            cfg.base_url_with(Some("0.0.0.0:9999".to_string())).unwrap(),
            "http://0.0.0.0:9999"
        );
        assert_eq!(
            config("ollama", None).base_url_with(None).unwrap(),
            "http://127.0.0.1:11434"
        );
        assert_eq!(
            config("openai", None).base_url_with(Some(" ".to_string())).unwrap(),
            "http://127.0.0.1:1234/v1"
        );
    }

    #[test]
    fn test_bad_base_url_is_rejected() {
        let cfg = config("ollama", Some("http://"));
        assert!(matches!(
            cfg.base_url_with(None),
            Err(GenerationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_provider() {
        let err = create_llm(&config("gemini", None)).unwrap_err();
        assert!(err.to_string().contains("Unknown LLM provider"));
    }

    #[test]
    fn test_ollama_response_parsing() {
        let json = r#"{"model":"llama3","created_at":"2024-01-01T00:00:00Z","response":"Once upon a time","done":true}"#;
        let result: OllamaResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.response, "Once upon a time");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_ollama_tag_matching() {
        let json = r#"{"models":[{"name":"llama3:latest","size":1},{"name":"mistral:7b-instruct","size":2}]}"#;
        let tags: OllamaTags = serde_json::from_str(json).unwrap();
        assert!(ollama_has_model(&tags, "llama3"));
        assert!(ollama_has_model(&tags, "llama3:latest"));
        assert!(ollama_has_model(&tags, "mistral:7b-instruct"));
        assert!(!ollama_has_model(&tags, "mistral"));
        assert!(!ollama_has_model(&tags, "qwen2"));
    }

    #[test]
    fn test_openai_response_parsing() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "A title" },
                "finish_reason": "stop"
            }]
        }"#;
        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.choices[0].message.content.as_deref(), Some("A title"));
    }

    #[derive(Debug)]
    struct Flaky {
        failures: Mutex<usize>,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for Flaky {
        async fn generate(&self, _: &str, _: f32) -> Result<String, GenerationError> {
            *self.calls.lock().unwrap() += 1;
            let mut left = self.failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                Err(GenerationError::Empty)
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_retrying_client_recovers_from_transient_errors() {
        let calls = Arc::new(Mutex::new(0));
        let flaky = Flaky {
            failures: Mutex::new(2),
            calls: calls.clone(),
        };
        let client = RetryingClient::new(Box::new(flaky), 2, Duration::ZERO);
        assert_eq!(client.generate("p", 0.5).await.unwrap(), "ok");
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retrying_client_gives_up() {
        let calls = Arc::new(Mutex::new(0));
        let flaky = Flaky {
            failures: Mutex::new(5),
            calls: calls.clone(),
        };
        let client = RetryingClient::new(Box::new(flaky), 1, Duration::ZERO);
        assert!(matches!(
            client.generate("p", 0.5).await,
            Err(GenerationError::Empty)
        ));
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
