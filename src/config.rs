use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub window: WindowConfig,
    pub layout: LayoutConfig,
    /// Overrides locale detection, e.g. "vi" or "en".
    pub locale: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub chat_path: String,
    pub auto_start: bool,
    /// Shell command that activates the environment and starts the server.
    /// `{host}` and `{port}` are substituted from `url`.
    pub command: String,
    pub working_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub ready_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Grace period between the terminate request and a forced kill on close.
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

/// How the layout engine measures text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureMode {
    /// Shape with the font the window draws with.
    #[default]
    Font,
    /// Fixed advance of `char_width` per column.
    Monospace,
}

/// Pixel constants consumed by the bubble layout engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub measure: MeasureMode,
    pub container_padding: f32,
    pub scrollbar_reserve: f32,
    pub row_margin: f32,
    pub bubble_padding_x: f32,
    pub bubble_padding_y: f32,
    pub row_spacing: f32,
    pub font_size: f32,
    /// Advance of one monospace glyph, as a fraction of `font_size`.
    pub char_width: f32,
    /// Line height, as a fraction of the text size.
    pub line_height: f32,
    pub tag_size: f32,
    /// Size of the timestamp line.
    pub footer_size: f32,
}

#[cfg(windows)]
fn default_backend_command() -> String {
    r".venv\Scripts\activate && python -m uvicorn main:app --host {host} --port {port}".to_string()
}

#[cfg(not(windows))]
fn default_backend_command() -> String {
    ". .venv/bin/activate && exec python -m uvicorn main:app --host {host} --port {port}".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            url: "http://127.0.0.1:8000".to_string(),
            chat_path: "/chat".to_string(),
            auto_start: true,
            command: default_backend_command(),
            working_dir: PathBuf::from("backend"),
            log_file: None,
            ready_timeout_secs: 12,
            request_timeout_secs: 30,
            stop_timeout_secs: 5,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 800,
            height: 600,
            min_width: 400,
            min_height: 300,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            measure: MeasureMode::Font,
            container_padding: 20.0,
            scrollbar_reserve: 14.0,
            row_margin: 80.0,
            bubble_padding_x: 20.0,
            bubble_padding_y: 14.0,
            row_spacing: 10.0,
            font_size: 15.0,
            char_width: 0.6,
            line_height: 1.3,
            tag_size: 12.0,
            footer_size: 11.0,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config = Self::load_from(&Self::get_config_path());
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match fs::read_to_string(config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Error parsing {}: {}. Using defaults.", config_path.display(), e),
                },
                Err(e) => tracing::warn!("Error reading {}: {}. Using defaults.", config_path.display(), e),
            }
        } else if let Some(parent) = config_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Config::default()
    }

    /// Applies `BUBBLECHAT_*` overrides; `lookup` is `std::env::var` outside tests.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BUBBLECHAT_BACKEND_URL").filter(|v| !v.trim().is_empty()) {
            self.backend.url = url.trim().to_string();
        }
        if let Some(raw) = lookup("BUBBLECHAT_AUTO_START") {
            self.backend.auto_start = parse_flag(&raw);
        }
        if let Some(dir) = lookup("BUBBLECHAT_BACKEND_DIR").filter(|v| !v.trim().is_empty()) {
            self.backend.working_dir = PathBuf::from(dir.trim());
        }
        if let Some(locale) = lookup("BUBBLECHAT_LOCALE").filter(|v| !v.trim().is_empty()) {
            self.locale = Some(locale.trim().to_string());
        }
        self.backend.url = self.backend.url.trim_end_matches('/').to_string();
        self
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/bubble-chat")
        } else {
            PathBuf::from(".")
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
