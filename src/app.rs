use crate::config::Config;
use crate::conversation::{Conversation, HistoryPolicy, SharedProvider};
use crate::personality::{self, Personality};
use crate::provider::ReadOptions;
use anyhow::Context;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

/// Primary credential shared by both providers.
pub const PRIMARY_KEY_ENV: &str = "API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    DeepSeek,
    Gemini,
}

impl ProviderKind {
    pub fn parse(name: &str) -> anyhow::Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::DeepSeek),
            "gemini" | "google" => Ok(Self::Gemini),
            other => anyhow::bail!("unknown provider: {other} (expected \"deepseek\" or \"gemini\")"),
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Self::DeepSeek => "DeepSeek",
            Self::Gemini => "Gemini",
        }
    }

    fn key_env(self) -> &'static str {
        match self {
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    fn base_url_env(self) -> &'static str {
        match self {
            Self::DeepSeek => "DEEPSEEK_BASE_URL",
            Self::Gemini => "GEMINI_BASE_URL",
        }
    }
}

/// Credential and endpoint for one provider. A missing key is reported by
/// the provider on each call, so the UI can show it as an error turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub api_key: Option<String>,
    pub base_url: Url,
}

/// Resolve credential and endpoint for `kind` without touching the network.
///
/// Credential order: provider env override, `API_KEY`, config. Endpoint
/// order: env override, config, built-in default. Blank values are ignored.
pub fn resolve_endpoint(
    kind: ProviderKind,
    cfg: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Endpoint> {
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    let (cfg_key, cfg_base, default_base) = match kind {
        ProviderKind::DeepSeek => (
            cfg.deepseek.api_key.clone(),
            cfg.deepseek.base_url.clone(),
            DEEPSEEK_DEFAULT_BASE,
        ),
        ProviderKind::Gemini => (
            cfg.gemini.api_key.clone(),
            cfg.gemini.base_url.clone(),
            GEMINI_DEFAULT_BASE,
        ),
    };

    let api_key = non_blank(env(kind.key_env()))
        .or_else(|| non_blank(env(PRIMARY_KEY_ENV)))
        .or_else(|| non_blank(cfg_key))
        .map(|k| k.trim().to_string());
    if api_key.is_none() {
        tracing::debug!(
            provider = kind.display_name(),
            env_var = kind.key_env(),
            "no API key configured"
        );
    }

    let base = non_blank(env(kind.base_url_env()))
        .or_else(|| non_blank(cfg_base))
        .unwrap_or_else(|| default_base.to_string());
    // Url::join drops the last segment unless the base ends with a slash.
    let base = if base.ends_with('/') { base } else { format!("{base}/") };
    let base_url =
        Url::parse(&base).with_context(|| format!("invalid {} base URL: {base}", kind.display_name()))?;

    Ok(Endpoint { api_key, base_url })
}

#[cfg(feature = "deepseek")]
const DEEPSEEK_DEFAULT_BASE: &str = crate::provider::deepseek::DEFAULT_BASE_URL;
#[cfg(not(feature = "deepseek"))]
const DEEPSEEK_DEFAULT_BASE: &str = "https://api.deepseek.com/v1/";

#[cfg(feature = "gemini")]
const GEMINI_DEFAULT_BASE: &str = crate::provider::gemini::DEFAULT_BASE_URL;
#[cfg(not(feature = "gemini"))]
const GEMINI_DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/";

pub fn read_options(cfg: &Config) -> ReadOptions {
    ReadOptions {
        idle_timeout: (cfg.stream_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(cfg.stream_idle_timeout_secs)),
    }
}

pub fn build_provider(
    http: &reqwest::Client,
    cfg: &Config,
    kind: ProviderKind,
    model_override: Option<String>,
) -> anyhow::Result<SharedProvider> {
    let endpoint = resolve_endpoint(kind, cfg, |k| std::env::var(k).ok())?;
    let read = read_options(cfg);

    match kind {
        ProviderKind::DeepSeek => {
            #[cfg(feature = "deepseek")]
            {
                use crate::provider::deepseek;
                let model = model_override
                    .or_else(|| cfg.deepseek.model.clone())
                    .unwrap_or_else(|| deepseek::DEFAULT_MODEL.to_string());
                let p = deepseek::DeepSeekProvider::new(
                    http.clone(),
                    endpoint.api_key,
                    endpoint.base_url,
                    model,
                    cfg.deepseek.max_tokens.unwrap_or(deepseek::DEFAULT_MAX_TOKENS),
                    read,
                );
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "deepseek"))]
            {
                let _ = (http, endpoint, read, model_override);
                anyhow::bail!("deepseek provider is not enabled in this build")
            }
        }
        ProviderKind::Gemini => {
            #[cfg(feature = "gemini")]
            {
                use crate::provider::gemini;
                let model = model_override
                    .or_else(|| cfg.gemini.model.clone())
                    .unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string());
                let p = gemini::GeminiProvider::new(
                    http.clone(),
                    endpoint.api_key,
                    endpoint.base_url,
                    model,
                    cfg.gemini
                        .thinking_budget
                        .unwrap_or(gemini::DEFAULT_THINKING_BUDGET),
                    read,
                );
                Ok(Arc::new(p))
            }
            #[cfg(not(feature = "gemini"))]
            {
                let _ = (http, endpoint, read, model_override);
                anyhow::bail!("gemini provider is not enabled in this build")
            }
        }
    }
}

pub fn select_personality(cfg: &Config, id: Option<&str>) -> anyhow::Result<Personality> {
    let all = personality::catalog(&cfg.personalities);
    match id.or(cfg.personality.as_deref()) {
        Some(id) => personality::find(&all, id)
            .cloned()
            .with_context(|| format!("unknown personality: {id} (see `reasonchat personalities`)")),
        None => all
            .into_iter()
            .next()
            .context("no personalities available"),
    }
}

pub fn history_policy(cfg: &Config) -> HistoryPolicy {
    HistoryPolicy {
        window: cfg.history_window,
        skip_error_turns: cfg.skip_error_turns,
    }
}

pub fn build_conversation(
    provider: SharedProvider,
    cfg: &Config,
    personality: Personality,
) -> Conversation {
    Conversation::new(provider, personality, history_policy(cfg))
}
