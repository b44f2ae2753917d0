//! Classification oracle: "is this message a request for surf lessons?"

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Prompt sent to the model; `{message}` is replaced by the message text
pub const DEFAULT_PROMPT: &str = "Является ли данное сообщение из публичного канала Telegram \
запросом на обучение серфингу? В ответ пришли только \"true\" или \"false\". \
Сообщение: \"{message}\"";

const MESSAGE_PLACEHOLDER: &str = "{message}";

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier returned status {0}")]
    Status(u16),

    #[error("Malformed classifier response: {0}")]
    Malformed(String),

    #[error("Classifier timed out")]
    Timeout,
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// Boolean text classifier
///
/// Callers treat any error as "not approved"; implementations do not retry.
#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    async fn classify(&self, text: &str) -> ClassifierResult<bool>;
}

/// Classifier backed by a Gemini `generateContent` endpoint.
///
/// The endpoint URL carries the API key (`...:generateContent?key=...`).
#[derive(Debug, Clone)]
pub struct GeminiClassifier {
    endpoint: String,
    prompt: String,
    http: Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClassifier {
    pub fn new(endpoint: &str, prompt: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            prompt: prompt.unwrap_or(DEFAULT_PROMPT).to_string(),
            http: Client::new(),
        }
    }

    fn render_prompt(&self, text: &str) -> String {
        if self.prompt.contains(MESSAGE_PLACEHOLDER) {
            self.prompt.replace(MESSAGE_PLACEHOLDER, text)
        } else {
            format!("{}\n{}", self.prompt, text)
        }
    }
}

/// Extract the verdict from a `generateContent` response body
fn parse_verdict(body: GenerateResponse) -> ClassifierResult<bool> {
    let text = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| ClassifierError::Malformed("no candidate text".to_string()))?;

    Ok(text.trim() == "true")
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, text: &str) -> ClassifierResult<bool> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(self.render_prompt(text)),
                }],
            }],
        };

        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(ClassifierError::Status(response.status().as_u16()));
        }

        let body: GenerateResponse = response.json().await?;
        parse_verdict(body)
    }
}
