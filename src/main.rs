mod app;
mod cli;
mod config;
mod conversation;
mod paths;
mod personality;
mod provider;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use conversation::Outcome;
use provider::Channel;
use std::io::Write;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the streamed answer.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = cli::Args::parse();

    let config_file = paths::config_file()?;
    let cfg = config::Config::load_optional(&config_file)?.unwrap_or_default();
    tracing::debug!(?config_file, ?cfg, "resolved config");

    if let Some(cli::Command::Personalities) = args.cmd {
        let mut out = std::io::stdout();
        for p in personality::catalog(&cfg.personalities) {
            writeln!(out, "{:<12} {:<20} {}", p.id, p.label(), p.description).ok();
        }
        return Ok(());
    }

    let provider_name = args
        .provider
        .clone()
        .or_else(|| cfg.provider.clone())
        .unwrap_or_else(|| "deepseek".to_string());
    let kind = app::ProviderKind::parse(&provider_name)?;
    let persona = app::select_personality(&cfg, args.personality.as_deref())?;

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let provider = app::build_provider(&http, &cfg, kind, args.model.clone())?;
    let mut chat = app::build_conversation(provider, &cfg, persona);

    #[cfg(feature = "tui")]
    {
        if let Some(cli::Command::Tui) = args.cmd {
            return tui::run_tui(chat, personality::catalog(&cfg.personalities)).await;
        }
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: reasonchat \"Hello\" or `reasonchat tui` (feature flag)");
    }

    let mut last_channel: Option<Channel> = None;
    let outcome = chat
        .submit(&prompt, |delta, _| {
            match delta.channel {
                Channel::Reasoning => {
                    let mut err = std::io::stderr();
                    write!(err, "{}", delta.text).ok();
                    err.flush().ok();
                }
                Channel::Content => {
                    if last_channel == Some(Channel::Reasoning) {
                        eprintln!("\n");
                    }
                    let mut out = std::io::stdout();
                    write!(out, "{}", delta.text).ok();
                    out.flush().ok();
                }
            }
            last_channel = Some(delta.channel);
        })
        .await;

    match outcome {
        Outcome::Completed | Outcome::Ignored => {
            println!();
            Ok(())
        }
        Outcome::Failed { .. } => {
            let text = chat
                .turns()
                .last()
                .map(|t| t.content.clone())
                .unwrap_or_default();
            anyhow::bail!(text)
        }
    }
}
