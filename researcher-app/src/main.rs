//! `researcher` command-line entry point.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use researcher_llm::{MaxTokens, ProviderId};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "researcher", version, about = "Chat with several LLM providers through one interface")]
struct Cli {
    /// Optional TOML settings file; environment variables take precedence over it.
    #[arg(long, global = true, env = "RESEARCHER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List supported providers, their models and whether a key is configured.
    Providers,
    /// Send a short greeting through each configured provider.
    Check {
        #[arg(long)]
        provider: Option<ProviderId>,
    },
    /// One-shot generation.
    Ask {
        prompt: String,
        #[arg(long)]
        provider: Option<ProviderId>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Positive integer, or `unbounded`.
        #[arg(long)]
        max_tokens: Option<MaxTokens>,
        #[arg(long, conflicts_with = "stream")]
        system: Option<String>,
        /// Print chunks as they arrive.
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional.
    let dotenv = dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let cli = Cli::parse();
    let factory = config::load_factory(cli.config.as_deref())?;

    match cli.command {
        Command::Providers => {
            print!("{}", commands::render_providers(&commands::provider_rows(&factory)));
            Ok(())
        }
        Command::Check { provider } => {
            let report = commands::check(&factory, provider).await;
            print!("{}", report.render());
            if report.failed() > 0 {
                anyhow::bail!("{} provider check(s) failed", report.failed());
            }
            Ok(())
        }
        Command::Ask {
            prompt,
            provider,
            model,
            temperature,
            max_tokens,
            system,
            stream,
        } => {
            let request = commands::AskRequest {
                prompt,
                provider,
                model,
                temperature,
                max_tokens,
                system,
                stream,
            };
            commands::ask(&factory, &request, &mut std::io::stdout().lock()).await
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,researcher=debug,researcher_llm=debug"),
    };
    let log_format = std::env::var("RESEARCHER_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    match log_format.as_str() {
        "json" => builder
            .with_file(true)
            .with_line_number(true)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported RESEARCHER_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
