use std::{collections::HashMap, fs, time::Duration};

use crate::{
    channel::{ChannelEndpoints, ReconnectPolicy},
    error::ChannelError,
};

pub const DEFAULT_API_URL: &str = "https://norma.nomoreparties.space/api";
const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    /// Explicit websocket base; derived from `api_url` when absent.
    pub feed_url: Option<String>,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub close_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            feed_url: None,
            reconnect_max_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            close_timeout_ms: 2_000,
        }
    }
}

impl ClientSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_max_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
        }
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn endpoints(&self) -> Result<ChannelEndpoints, ChannelError> {
        match self.feed_url.as_deref() {
            Some(feed_url) => ChannelEndpoints::new(feed_url),
            None => ChannelEndpoints::from_api_url(&self.api_url),
        }
    }

    /// Overlays the keys of a `client.toml` document. Unknown keys and
    /// unparseable values are ignored.
    pub fn apply_file(&mut self, raw: &str) {
        let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
            return;
        };
        let text = |key: &str| file_cfg.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let number = |key: &str| {
            file_cfg
                .get(key)
                .and_then(|v| v.as_integer())
                .and_then(|v| u64::try_from(v).ok())
        };

        if let Some(v) = text("api_url") {
            self.api_url = v;
        }
        if let Some(v) = text("feed_url") {
            self.feed_url = Some(v);
        }
        if let Some(v) = number("reconnect_max_attempts").and_then(|v| u32::try_from(v).ok()) {
            self.reconnect_max_attempts = v;
        }
        if let Some(v) = number("reconnect_base_delay_ms") {
            self.reconnect_base_delay_ms = v;
        }
        if let Some(v) = number("reconnect_max_delay_ms") {
            self.reconnect_max_delay_ms = v;
        }
        if let Some(v) = number("close_timeout_ms") {
            self.close_timeout_ms = v;
        }
    }

    /// Overlays environment variables read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("BURGER_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = var("APP__API_URL") {
            self.api_url = v;
        }
        if let Some(v) = var("APP__FEED_URL") {
            self.feed_url = Some(v);
        }

        if let Some(v) = var("APP__RECONNECT_MAX_ATTEMPTS") {
            if let Ok(parsed) = v.parse::<u32>() {
                self.reconnect_max_attempts = parsed;
            }
        }
        if let Some(v) = var("APP__RECONNECT_BASE_DELAY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.reconnect_base_delay_ms = parsed;
            }
        }
        if let Some(v) = var("APP__RECONNECT_MAX_DELAY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.reconnect_max_delay_ms = parsed;
            }
        }
        if let Some(v) = var("APP__CLOSE_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.close_timeout_ms = parsed;
            }
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then the
/// environment.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        settings.apply_file(&raw);
    }
    settings.apply_env(|key| std::env::var(key).ok());

    settings
}
