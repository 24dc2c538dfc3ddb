use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:5151";
pub const DEFAULT_ASK_OPERATOR: &str = "ask_datachat";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub endpoint: Option<String>,
    pub ask_operator: Option<String>,
    pub dataset: Option<String>,
    /// Characters revealed per tick for incoming messages.
    pub typewriter_speed: Option<usize>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            endpoint: Some(DEFAULT_ENDPOINT.to_string()),
            ask_operator: Some(DEFAULT_ASK_OPERATOR.to_string()),
            dataset: None,
            typewriter_speed: None,
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn ask_operator(&self) -> &str {
        self.ask_operator.as_deref().unwrap_or(DEFAULT_ASK_OPERATOR)
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("datachat").join("config.json"))
    }
}
