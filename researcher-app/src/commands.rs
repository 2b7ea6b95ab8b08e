//! Subcommands of the `researcher` binary.

use anyhow::Result;
use futures_util::StreamExt;
use researcher_llm::{GenerationOptions, LlmFactory, MaxTokens, Message, Overrides, ProviderId};
use std::fmt::Write as _;
use std::io::Write;

pub const PROBE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Introduce yourself in one sentence.";
pub const PROBE_USER_PROMPT: &str = "Hello!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRow {
    pub provider: ProviderId,
    pub default_model: &'static str,
    pub model: String,
    pub key_configured: bool,
}

pub fn provider_rows(factory: &LlmFactory) -> Vec<ProviderRow> {
    LlmFactory::list_providers()
        .iter()
        .map(|&provider| {
            let spec = provider.spec();
            ProviderRow {
                provider,
                default_model: spec.default_model,
                model: factory
                    .source()
                    .get(&spec.model_var())
                    .unwrap_or_else(|| spec.default_model.to_string()),
                key_configured: factory.has_api_key(provider),
            }
        })
        .collect()
}

pub fn render_providers(rows: &[ProviderRow]) -> String {
    let mut out = format!(
        "{:<12} {:<32} {:<32} {}\n",
        "PROVIDER", "DEFAULT MODEL", "MODEL", "API KEY"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:<12} {:<32} {:<32} {}",
            row.provider.as_str(),
            row.default_model,
            row.model,
            if row.key_configured { "set" } else { "missing" }
        );
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Passed { model: String, reply: String },
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub results: Vec<(ProviderId, ProbeOutcome)>,
}

impl CheckReport {
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, ProbeOutcome::Passed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ProbeOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ProbeOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ProbeOutcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (provider, outcome) in &self.results {
            let _ = match outcome {
                ProbeOutcome::Passed { model, reply } => {
                    writeln!(out, "[ok]      {provider} ({model}): {}", reply.trim())
                }
                ProbeOutcome::Skipped => {
                    writeln!(out, "[skipped] {provider}: no API key configured")
                }
                ProbeOutcome::Failed { error } => writeln!(out, "[failed]  {provider}: {error}"),
            };
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        );
        out
    }
}

/// Sends a short greeting through every provider that has a key, or through `only`.
///
/// A provider named explicitly is probed even without a key so the missing setting is reported
/// as a failure.
pub async fn check(factory: &LlmFactory, only: Option<ProviderId>) -> CheckReport {
    let targets: Vec<ProviderId> = match only {
        Some(provider) => vec![provider],
        None => LlmFactory::list_providers().to_vec(),
    };

    let mut report = CheckReport::default();
    for provider in targets {
        if only.is_none() && !factory.has_api_key(provider) {
            tracing::debug!(%provider, "skipping provider without api key");
            report.results.push((provider, ProbeOutcome::Skipped));
            continue;
        }
        let outcome = probe(factory, provider).await;
        if let ProbeOutcome::Failed { error } = &outcome {
            tracing::warn!(%provider, error = %error, "provider check failed");
        }
        report.results.push((provider, outcome));
    }
    report
}

async fn probe(factory: &LlmFactory, provider: ProviderId) -> ProbeOutcome {
    let client = match factory.create(Some(provider), Overrides::new()) {
        Ok(client) => client,
        Err(e) => {
            return ProbeOutcome::Failed {
                error: e.to_string(),
            };
        }
    };
    let messages = [
        Message::system(PROBE_SYSTEM_PROMPT),
        Message::user(PROBE_USER_PROMPT),
    ];
    match client.invoke(&messages, &GenerationOptions::new()).await {
        Ok(reply) => ProbeOutcome::Passed {
            model: client.model().to_string(),
            reply: reply.content,
        },
        Err(e) => ProbeOutcome::Failed {
            error: e.to_string(),
        },
    }
}

#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub prompt: String,
    pub provider: Option<ProviderId>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<MaxTokens>,
    pub system: Option<String>,
    pub stream: bool,
}

impl AskRequest {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides::new();
        if let Some(model) = &self.model {
            overrides = overrides.model(model.clone());
        }
        if let Some(t) = self.temperature {
            overrides = overrides.temperature(t);
        }
        if let Some(m) = self.max_tokens {
            overrides = overrides.max_tokens(m);
        }
        overrides
    }
}

/// One-shot generation written to `out`; with `stream` each chunk is flushed as it arrives.
pub async fn ask(factory: &LlmFactory, request: &AskRequest, out: &mut impl Write) -> Result<()> {
    let client = factory.create(request.provider, request.overrides())?;
    let options = GenerationOptions::new();

    if request.stream {
        if request.system.is_some() {
            anyhow::bail!("a system prompt cannot be combined with streaming");
        }
        let mut chunks = client.stream_generate(&request.prompt, &options).await?;
        while let Some(chunk) = chunks.next().await {
            out.write_all(chunk?.as_bytes())?;
            out.flush()?;
        }
        writeln!(out)?;
        return Ok(());
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        messages.push(Message::system(system.clone()));
    }
    messages.push(Message::user(request.prompt.clone()));
    let reply = client.invoke(&messages, &options).await?;
    writeln!(out, "{}", reply.content)?;
    Ok(())
}
