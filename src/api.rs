use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Failure of one request/response cycle. The display text goes to the log;
/// the bubble gets the localized form from `I18n::describe_error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("API error {status}{}", detail_suffix(.detail))]
    Status { status: u16, detail: String },
    #[error("invalid JSON response from {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("HTTP client unavailable")]
    Unavailable,
}

pub(crate) fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" - {}", detail)
    }
}

/// Client for the local chat backend. Constructed once by the window and
/// cloned into each request task.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    chat_path: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(base_url: &str, chat_path: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ChatClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_path: normalize_path(chat_path),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one message. `Ok(None)` means the backend answered without a
    /// `response` value.
    pub async fn send(&self, message: &str) -> Result<Option<String>, ApiError> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        tracing::debug!("POST {} ({} bytes)", url, message.len());

        let response = self
            .client
            .post(&url)
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            let error = ApiError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            };
            tracing::warn!("{}", error);
            return Err(error);
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            path: self.chat_path.clone(),
            reason: e.to_string(),
        })?;

        Ok(parsed.response)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Prefers a JSON `detail` field, as FastAPI-style backends return, and
/// falls back to the raw body.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        Ok(_) => String::new(),
        Err(_) => body.trim().to_string(),
    }
}
