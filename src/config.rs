use crate::personality::Personality;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider identifier ("deepseek" or "gemini").
    pub provider: Option<String>,

    /// Personality id selected at startup.
    pub personality: Option<String>,

    /// Number of recent turns sent as context.
    pub history_window: usize,

    /// Leave earlier error turns out of the context sent upstream.
    pub skip_error_turns: bool,

    /// Give up on a stream after this many seconds without data (0 = never).
    pub stream_idle_timeout_secs: u64,

    pub deepseek: DeepSeekConfig,
    pub gemini: GeminiConfig,

    /// Extra personalities; an entry with a built-in id replaces it.
    pub personalities: Vec<Personality>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: None,
            personality: None,
            history_window: 6,
            skip_error_turns: true,
            stream_idle_timeout_secs: 120,
            deepseek: DeepSeekConfig::default(),
            gemini: GeminiConfig::default(),
            personalities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeepSeekConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub thinking_budget: Option<u32>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}
