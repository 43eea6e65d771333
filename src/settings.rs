use crate::diagnostics::DEFAULT_DIAGNOSTICS_CAPACITY;
use crate::error::SettingsError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_SERVER_URL: &str = "CHATWIRE_SERVER_URL";
pub const ENV_RECONNECT_DELAY_MS: &str = "CHATWIRE_RECONNECT_DELAY_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// HTTP base of the chat API, e.g. `http://localhost:8000/api/v1`.
    /// The socket address is derived from it (http→ws, https→wss).
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            upload_timeout_secs: default_upload_timeout_secs(),
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:8000/api/v1".into()
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_upload_timeout_secs() -> u64 {
    30
}
fn default_diagnostics_capacity() -> usize {
    DEFAULT_DIAGNOSTICS_CAPACITY
}

impl ClientSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }

    fn base_url(&self) -> Result<Url, SettingsError> {
        let url = Url::parse(self.server_url.trim()).map_err(|e| SettingsError::InvalidUrl {
            url: self.server_url.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SettingsError::UnsupportedScheme(other.to_string())),
        }
    }

    fn url_with_segments<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, SettingsError> {
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| SettingsError::InvalidUrl {
                url: self.server_url.clone(),
                reason: "cannot be a base".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// `ws(s)://…/chat/ws/chat/{identity}?token={credential}`
    pub fn chat_socket_url(&self, identity: &str, credential: &str) -> Result<Url, SettingsError> {
        let mut url = self.url_with_segments(["chat", "ws", "chat", identity])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| SettingsError::UnsupportedScheme(url.scheme().to_string()))?;
        url.query_pairs_mut().append_pair("token", credential);
        Ok(url)
    }

    pub fn voice_upload_url(&self) -> Result<Url, SettingsError> {
        self.url_with_segments(["chat", "voice"])
    }

    /// Apply `CHATWIRE_*` overrides from `lookup` (normally the process env).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.server_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_RECONNECT_DELAY_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.reconnect_delay_ms = ms,
                Err(e) => log::warn!(
                    "[settings] ignoring {}={:?}: {}",
                    ENV_RECONNECT_DELAY_MS,
                    raw,
                    e
                ),
            }
        }
    }
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("chatwire").join("settings.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".chatwire").join("settings.json"));
    }
    Err(SettingsError::NoDataDir)
}

pub fn load_from(path: &Path) -> Result<ClientSettings, SettingsError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Settings from the default location plus env overrides. Missing or broken
/// files fall back to defaults.
pub fn load() -> ClientSettings {
    let mut settings = match settings_path().and_then(|p| load_from(&p)) {
        Ok(s) => s,
        Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            ClientSettings::default()
        }
        Err(e) => {
            log::warn!("[settings] using defaults: {}", e);
            ClientSettings::default()
        }
    };
    settings.apply_overrides(|key| std::env::var(key).ok());
    settings
}

pub fn save_to(path: &Path, settings: &ClientSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn save(settings: &ClientSettings) -> Result<(), SettingsError> {
    save_to(&settings_path()?, settings)
}
