//! Provider adapters for the `takeoff` binary
//!
//! [`HttpAdapter`] speaks each vendor's completion API over reqwest;
//! [`FileAdapter`] replays a saved raw output. Request building, reply
//! parsing and status classification are plain functions so they can be
//! tested without a network.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use takeoff_consensus::{ProviderAdapter, ProviderError, ProviderId, ProviderReply, ProviderRequest};
use tracing::{debug, warn};

use crate::config::{ConfigError, ProviderCredentials};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const XAI_URL: &str = "https://api.x.ai/v1/chat/completions";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Live vendor adapter
pub struct HttpAdapter {
    provider: ProviderId,
    credentials: ProviderCredentials,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(provider: ProviderId, credentials: ProviderCredentials) -> anyhow::Result<Self> {
        // per-call deadlines come from the dispatcher
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            provider,
            credentials,
            client,
        })
    }
}

#[async_trait]
impl ProviderAdapter for HttpAdapter {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let model = &self.credentials.model;
        let key = &self.credentials.api_key;
        let body = request_body(self.provider, model, request);

        let builder = match self.provider {
            ProviderId::Claude => self
                .client
                .post(ANTHROPIC_URL)
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01"),
            ProviderId::Gpt => self.client.post(OPENAI_URL).bearer_auth(key),
            ProviderId::Grok => self.client.post(XAI_URL).bearer_auth(key),
            ProviderId::Gemini => self
                .client
                .post(format!("{GEMINI_URL}/{model}:generateContent"))
                .header("x-goog-api-key", key),
        };

        debug!(provider = %self.provider, model = %model, "Sending completion request");
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(provider = %self.provider, status = status.as_u16(), "Provider returned an error status");
            return Err(classify_status(status.as_u16(), &text, model));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(format!("unreadable response body: {e}")))?;
        parse_reply(self.provider, &json)
    }
}

/// Vendor-specific JSON body for one completion call.
pub fn request_body(provider: ProviderId, model: &str, request: &ProviderRequest) -> Value {
    match provider {
        ProviderId::Claude => {
            let mut content: Vec<Value> = request
                .images
                .iter()
                .map(|url| json!({"type": "image", "source": {"type": "url", "url": url}}))
                .collect();
            content.push(json!({"type": "text", "text": request.user_prompt}));
            json!({
                "model": model,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "system": request.system_prompt,
                "messages": [{"role": "user", "content": content}]
            })
        }
        ProviderId::Gpt | ProviderId::Grok => {
            let user: Value = if request.images.is_empty() {
                json!(request.user_prompt)
            } else {
                let mut parts = vec![json!({"type": "text", "text": request.user_prompt})];
                parts.extend(
                    request
                        .images
                        .iter()
                        .map(|url| json!({"type": "image_url", "image_url": {"url": url}})),
                );
                Value::Array(parts)
            };
            json!({
                "model": model,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "messages": [
                    {"role": "system", "content": request.system_prompt},
                    {"role": "user", "content": user}
                ]
            })
        }
        ProviderId::Gemini => {
            let mut parts = vec![json!({"text": request.user_prompt})];
            parts.extend(request.images.iter().map(|url| {
                json!({"fileData": {"fileUri": url, "mimeType": image_mime(url)}})
            }));
            json!({
                "systemInstruction": {"parts": [{"text": request.system_prompt}]},
                "contents": [{"role": "user", "parts": parts}],
                "generationConfig": {
                    "temperature": request.temperature,
                    "maxOutputTokens": request.max_tokens
                }
            })
        }
    }
}

fn image_mime(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

/// Pull the completion text out of a vendor response.
pub fn parse_reply(provider: ProviderId, json: &Value) -> Result<ProviderReply, ProviderError> {
    let (content, finish_reason, tokens) = match provider {
        ProviderId::Claude => (
            json["content"]
                .as_array()
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default(),
            json["stop_reason"].as_str(),
            json["usage"]["output_tokens"].as_u64(),
        ),
        ProviderId::Gpt | ProviderId::Grok => (
            json["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            json["choices"][0]["finish_reason"].as_str(),
            json["usage"]["completion_tokens"].as_u64(),
        ),
        ProviderId::Gemini => (
            json["candidates"][0]["content"]["parts"]
                .as_array()
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default(),
            json["candidates"][0]["finishReason"].as_str(),
            json["usageMetadata"]["candidatesTokenCount"].as_u64(),
        ),
    };

    if content.trim().is_empty() {
        return Err(ProviderError::Request(format!(
            "{provider} returned no completion text"
        )));
    }
    Ok(ProviderReply {
        content,
        finish_reason: finish_reason.unwrap_or("unknown").to_string(),
        tokens_used: tokens.and_then(|t| u32::try_from(t).ok()),
    })
}

/// Map an HTTP error status onto the provider error taxonomy.
pub fn classify_status(status: u16, body: &str, model: &str) -> ProviderError {
    let detail = format!("HTTP {status}: {}", truncate(body, 300));
    let lower = body.to_ascii_lowercase();
    let context_overflow = [
        "context length",
        "context_length",
        "too long",
        "maximum context",
        "token limit",
    ]
    .iter()
    .any(|needle| lower.contains(needle));
    match status {
        401 | 403 => ProviderError::Auth(detail),
        404 => ProviderError::ModelNotFound(format!("{model} ({detail})")),
        429 => ProviderError::RateLimit(detail),
        400 | 413 if context_overflow => ProviderError::ContextOverflow(detail),
        _ => ProviderError::Request(detail),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

/// Replays a raw output saved from an earlier run
pub struct FileAdapter {
    content: String,
}

impl FileAdapter {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for FileAdapter {
    async fn call(&self, _request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply::new(self.content.clone()))
    }
}

/// Saved outputs in `dir`, one `<provider>.txt` or `<provider>.json` per
/// provider, returned in canonical provider order.
pub fn saved_responses(dir: &Path) -> Result<Vec<(ProviderId, PathBuf)>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: dir.display().to_string(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_saved = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "txt" || e == "json");
        if !is_saved {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()).and_then(ProviderId::parse) {
            Some(id) if !found.iter().any(|(seen, _)| *seen == id) => found.push((id, path)),
            Some(id) => warn!(provider = %id, path = %path.display(), "Duplicate saved response ignored"),
            None => debug!(path = %path.display(), "Skipping file with no provider name"),
        }
    }
    if found.is_empty() {
        return Err(ConfigError::NoResponses(dir.display().to_string()));
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}
