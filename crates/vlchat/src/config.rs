//! Client configuration, read from `~/.vlchat/client.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{ControllerConfig, TurnOptions};
use crate::error::DemoError;
use crate::params::DecodeMode;
use crate::session::ChatMode;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:9999/api";
pub const DEFAULT_MODEL_HEADER: &str = "luca-v-online";
pub const DEFAULT_TRACE_ID: &str = "web_demo";
pub const CONFIG_DIR: &str = ".vlchat";
pub const CONFIG_FILE: &str = "client.toml";

/// Every key is optional in the file; missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Single-shot endpoint; streaming uses `<server_url>/stream`
    pub server_url: String,
    /// Value of the model routing header
    pub model: String,
    /// Value of the trace header
    pub trace_id: String,
    pub disable_text_only: bool,
    /// Seconds to wait for the next stream event; 0 waits forever
    pub stream_idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub chat_mode: ChatMode,
    pub decode: DecodeMode,
    pub thinking: bool,
    pub stream: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            model: DEFAULT_MODEL_HEADER.to_string(),
            trace_id: DEFAULT_TRACE_ID.to_string(),
            disable_text_only: true,
            stream_idle_timeout_secs: 120,
            connect_timeout_secs: 10,
            chat_mode: ChatMode::Chat,
            decode: DecodeMode::Sampling,
            thinking: false,
            stream: true,
        }
    }
}

impl ClientConfig {
    /// `~/.vlchat/client.toml`, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(text: &str) -> Result<Self, DemoError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, DemoError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, or the default location when `None`. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, DemoError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => {
                    log::debug!("loading client config from {}", path.display());
                    Self::load(&path)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn validate(&self) -> Result<(), DemoError> {
        url::Url::parse(&self.server_url)?;
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.stream_idle_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            disable_text_only: self.disable_text_only,
            idle_timeout: self.idle_timeout(),
        }
    }

    pub fn turn_options(&self) -> TurnOptions {
        TurnOptions {
            decode: self.decode,
            thinking: self.thinking,
            stream: self.stream,
        }
    }
}
