use crate::{AssessRequest, Assessment, ImportanceProvider, ProviderError};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a system data expert. Return only valid JSON.";
const LEVELS: [&str; 3] = ["Low", "Medium", "High"];

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

fn build_prompt(request: &AssessRequest) -> String {
    format!(
        "Given the following file metadata, determine if the file is IMPORTANT (critical for \
         system or app functionality) or NON-IMPORTANT (safe to delete, e.g. caches, old logs). \
         Assign an importance level: Low (e.g. caches), Medium (e.g. old configs) or High \
         (e.g. critical system files). Provide a brief reason.\n\n\
         Metadata:\n- Path: {}\n- Size: {:.2} MB\n- Program: {}\n- Last Modified: {}\n- Category: {}\n\n\
         Respond with a single JSON object such as \
         {{\"important\": false, \"importance\": \"Low\", \"reason\": \"Browser cache, regenerates\"}}",
        request.path,
        request.size_bytes as f64 / (1024.0 * 1024.0),
        request.program,
        request.modified.as_deref().unwrap_or("unknown"),
        request.category.as_deref().unwrap_or("unknown"),
    )
}

/// Maps an HTTP failure status onto the retry taxonomy.
pub(crate) fn error_for_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = format!("status {} body {}", status, body);
    match status.as_u16() {
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        401 | 403 => ProviderError::Fatal(message),
        408 | 409 => ProviderError::Transient(message),
        s if s >= 500 => ProviderError::Transient(message),
        _ => ProviderError::Invalid(message),
    }
}

/// Parses the model's JSON reply. Unrecognized levels fall back to `Medium`.
pub(crate) fn parse_assessment(content: &str) -> Result<Assessment, ProviderError> {
    #[derive(Deserialize)]
    struct Reply {
        important: bool,
        importance: Option<String>,
        reason: Option<String>,
    }

    let reply: Reply = serde_json::from_str(content.trim())
        .map_err(|e| ProviderError::Invalid(format!("{e}: {content}")))?;
    let level = reply
        .importance
        .map(|l| {
            LEVELS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(l.trim()))
                .map(|known| known.to_string())
                .unwrap_or_else(|| "Medium".to_string())
        })
        .or_else(|| Some("Medium".to_string()));
    Ok(Assessment {
        important: reply.important,
        level,
        rationale: reply.reason,
    })
}

fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait::async_trait]
impl ImportanceProvider for OpenAiProvider {
    async fn assess(&self, request: &AssessRequest) -> Result<Assessment, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            max_tokens: u32,
            temperature: f32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        if self.cfg.api_key.is_empty() {
            return Err(ProviderError::Fatal("missing API key".into()));
        }

        let prompt = build_prompt(request);
        debug!(path = %request.path, model = %self.cfg.chat_model, "requesting classification");
        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: 150,
            temperature: 0.5,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = parse_retry_after(resp.headers().get(reqwest::header::RETRY_AFTER));
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(error_for_status(
                status,
                &String::from_utf8_lossy(&body),
                retry_after,
            ));
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        parse_assessment(&content)
    }
}
