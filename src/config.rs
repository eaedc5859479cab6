use std::path::PathBuf;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::errors::{AgentError, AgentResult};

pub const DEFAULT_MODEL_NAME: &str = "gpt-4o";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    /// Stored base64-obfuscated on disk; held decoded in memory.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_screenshot_count")]
    pub number_of_screenshots: u32,
    #[serde(default)]
    pub play_ding_on_completion: bool,
    #[serde(default)]
    pub custom_llm_instructions: String,
    #[serde(default)]
    pub default_browser: String,
    #[serde(default)]
    pub theme: String,
}

fn default_model() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

fn default_screenshot_count() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: String::new(),
            api_key: String::new(),
            number_of_screenshots: default_screenshot_count(),
            play_ding_on_completion: false,
            custom_llm_instructions: String::new(),
            default_browser: String::new(),
            theme: String::new(),
        }
    }
}

impl Settings {
    /// Endpoint with the shorthands the settings UI historically allowed:
    /// empty or "openai" means the public OpenAI endpoint, and a missing
    /// `/v1` suffix is appended.
    pub fn resolved_base_url(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "openai" {
            return DEFAULT_BASE_URL.to_string();
        }
        if trimmed.ends_with("/v1") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/v1")
        }
    }

    /// API key, falling back to the `DESKPILOT_API_KEY` environment variable
    /// when the settings file has none.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var("DESKPILOT_API_KEY").unwrap_or_default()
    }
}

pub fn settings_directory() -> AgentResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AgentError::Config("could not resolve home directory".into()))?;
    Ok(home.join(".deskpilot"))
}

fn settings_file_path() -> AgentResult<PathBuf> {
    Ok(settings_directory()?.join("config.toml"))
}

pub fn load_settings() -> AgentResult<Settings> {
    let path = settings_file_path()?;
    if !path.exists() {
        tracing::info!(path = %path.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)?;
    let mut settings: Settings = toml::from_str(&content)?;
    if !settings.api_key.is_empty() {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(settings.api_key.as_bytes())
            .map_err(|e| AgentError::Config(format!("api_key is not valid base64: {e}")))?;
        settings.api_key = String::from_utf8(decoded)
            .map_err(|e| AgentError::Config(format!("api_key is not valid UTF-8: {e}")))?;
    }
    tracing::info!(path = %path.display(), model = %settings.model, "settings loaded");
    Ok(settings)
}

pub fn save_settings(settings: &Settings) -> AgentResult<()> {
    let path = settings_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // The api_key is base64-obfuscated at rest.
    let mut stored = settings.clone();
    if !stored.api_key.is_empty() {
        stored.api_key =
            base64::engine::general_purpose::STANDARD.encode(stored.api_key.as_bytes());
    }
    let content = toml::to_string_pretty(&stored)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "settings saved");
    Ok(())
}

/// Settings holder with change notification. `update` publishes a new
/// snapshot; subscribers see it at their next checkpoint. Mid-run consumers
/// keep the snapshot they started with.
pub struct SettingsStore {
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Persist and publish a new settings snapshot.
    pub fn update(&self, settings: Settings) -> AgentResult<()> {
        save_settings(&settings)?;
        if self.tx.send(settings).is_err() {
            tracing::debug!("no settings subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_shorthands_resolve() {
        let mut s = Settings::default();
        assert_eq!(s.resolved_base_url(), DEFAULT_BASE_URL);

        s.base_url = "openai".into();
        assert_eq!(s.resolved_base_url(), DEFAULT_BASE_URL);

        s.base_url = "https://example.com/".into();
        assert_eq!(s.resolved_base_url(), "https://example.com/v1");

        s.base_url = "https://example.com/v1".into();
        assert_eq!(s.resolved_base_url(), "https://example.com/v1");
    }

    #[test]
    fn store_publishes_snapshots() {
        let store = SettingsStore::new(Settings::default());
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        let mut next = store.current();
        next.model = "gpt-4-vision-preview".into();
        // Bypass disk persistence: send directly like update() does after save.
        store.tx.send(next).unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().model, "gpt-4-vision-preview");
    }
}
