use serde_json::Value;
use std::collections::HashMap;
use std::env;

use crate::api::{detail_suffix, ApiError};
use crate::transcript::Author;

const EN: &str = include_str!("../i18n/en.json");
const VI: &str = include_str!("../i18n/vi.json");

/// Catalog of user-visible strings for one locale.
#[derive(Clone, Debug)]
pub struct I18n {
    locale: String,
    messages: HashMap<String, String>,
}

impl I18n {
    /// Resolves the locale from `preferred`, then the usual locale variables.
    pub fn detect(preferred: Option<&str>) -> Self {
        let locale = preferred
            .and_then(normalize_locale)
            .or_else(detect_locale)
            .unwrap_or_else(|| "en".to_string());
        Self::for_locale(&locale)
    }

    pub fn for_locale(locale: &str) -> Self {
        let locale = normalize_locale(locale).unwrap_or_else(|| "en".to_string());
        let messages = load_messages(&locale);
        I18n { locale, messages }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn t(&self, key: &str) -> String {
        self.messages
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn format(&self, key: &str, params: &[(&str, &str)]) -> String {
        let mut value = self.t(key);
        for (param, replacement) in params {
            value = value.replace(&format!("{{{param}}}"), replacement);
        }
        value
    }

    pub fn author(&self, author: Author) -> String {
        match author {
            Author::User => self.t("author.user"),
            Author::Assistant => self.t("author.assistant"),
        }
    }

    pub fn no_response(&self) -> String {
        self.t("reply.empty")
    }

    pub fn request_failed(&self, detail: &str) -> String {
        self.format("reply.error", &[("detail", detail)])
    }

    /// Localized text for `error`. Transport and decode causes stay as the
    /// underlying library reported them.
    pub fn describe_error(&self, error: &ApiError) -> String {
        match error {
            ApiError::Transport(detail) => {
                self.format("error.transport", &[("detail", detail.as_str())])
            }
            ApiError::Status { status, detail } => {
                let status = status.to_string();
                let detail = detail_suffix(detail);
                self.format(
                    "error.status",
                    &[("status", status.as_str()), ("detail", detail.as_str())],
                )
            }
            ApiError::Decode { path, .. } => self.format("error.decode", &[("path", path.as_str())]),
            ApiError::Unavailable => self.t("error.unavailable"),
        }
    }
}

fn normalize_locale(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let normalized = trimmed
        .split('.')
        .next()
        .unwrap_or(trimmed)
        .replace('-', "_")
        .to_lowercase();
    // "C" and "POSIX" carry no language.
    if normalized.is_empty() || normalized == "c" || normalized == "posix" {
        None
    } else {
        Some(normalized)
    }
}

fn detect_locale() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(|key| env::var(key).ok())
        .find_map(|value| normalize_locale(&value))
}

fn load_messages(locale: &str) -> HashMap<String, String> {
    let raw = if locale.starts_with("vi") { VI } else { EN };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect(),
        _ => {
            tracing::error!("Message catalog for {} is not a JSON object", locale);
            HashMap::new()
        }
    }
}
