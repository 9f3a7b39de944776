use clap::{Parser, Subcommand};

/// Streaming chat with DeepSeek or Gemini, reasoning included
#[derive(Debug, Parser)]
#[command(name = "reasonchat")]
#[command(version)]
#[command(about = "Streaming chat with DeepSeek or Gemini", long_about = None)]
pub struct Args {
    /// Provider: "deepseek" or "gemini" (default: config/provider or "deepseek")
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Model name (default: per-provider config or built-in)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Personality id (see `reasonchat personalities`)
    #[arg(short = 'p', long = "personality")]
    pub personality: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List available personalities
    Personalities,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
