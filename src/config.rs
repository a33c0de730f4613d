use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

pub const DEFAULT_ENDPOINT: &str = "https://api.binjie.fun/api/generateStream";
pub const DEFAULT_ORIGIN: &str = "chat18.aichatos.xyz";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";
pub const DEFAULT_SESSION_TAG: &str = "#/chat/master";
pub const DEFAULT_RENDER_WIDTH: usize = 60;
pub const DEFAULT_CODE_THEME: &str = "base16-eighties.dark";

/// Settings read from `<config_dir>/streamchat/config.json`.
///
/// Every field is optional in the file; missing ones keep the built-in value.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub origin: String,
    pub user_agent: String,
    pub session_tag: String,
    pub network: bool,
    pub render_width: usize,
    pub code_theme: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            session_tag: DEFAULT_SESSION_TAG.to_string(),
            network: true,
            render_width: DEFAULT_RENDER_WIDTH,
            code_theme: DEFAULT_CODE_THEME.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(config_path)?;
        let mut config: Config = serde_json::from_str(&config_content)
            .map_err(|e| anyhow!("Invalid config file {}: {}", config_path.display(), e))?;

        // A zero width would make every paragraph one word per line
        if config.render_width == 0 {
            config.render_width = DEFAULT_RENDER_WIDTH;
        }
        Ok(config)
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("streamchat").join("config.json"))
    }

    /// Directory for the log file. Falls back to the config dir on platforms
    /// without a cache dir.
    pub fn log_dir() -> Result<PathBuf> {
        let base = dirs::cache_dir()
            .or_else(dirs::config_dir)
            .ok_or_else(|| anyhow!("Could not determine cache directory"))?;

        Ok(base.join("streamchat"))
    }
}
