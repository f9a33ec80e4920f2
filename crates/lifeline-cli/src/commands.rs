//! Subcommand handlers.

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Context, Result};
use lifeline_core::{CachedResponse, OperationError, RequestContext, UserTier};
use lifeline_runtime::resilience::FallbackStage;
use lifeline_runtime::{HandoffQueue, HandoffSink, Lifeline, ResponseCache, RuntimeConfig};
use rand::Rng;
use serde::Serialize;

use crate::cli::{CacheCommand, ConfigCommand, HandoffCommand, OutputFormat, SimulateArgs, Strategy};

const PROMPT_PREVIEW_CHARS: usize = 48;

pub async fn handoffs(config: &RuntimeConfig, cmd: HandoffCommand) -> Result<()> {
    let queue = HandoffQueue::open(&config.handoff)
        .await
        .context("Failed to open handoff queue")?;

    match cmd {
        HandoffCommand::List { limit, format } => {
            let pending = queue.list_pending(limit).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pending)?),
                OutputFormat::Table => {
                    if pending.is_empty() {
                        println!("No pending handoff requests.");
                        return Ok(());
                    }
                    println!("{:<48} {:>3}  {:<20}  PROMPT", "REQUEST", "PRI", "QUEUED");
                    for request in &pending {
                        println!(
                            "{:<48} {:>3}  {:<20}  {}",
                            request.request_id,
                            request.priority.value(),
                            request.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                            preview(&request.original_prompt)
                        );
                    }
                }
            }
        }
        HandoffCommand::Show { request_id } => match queue.get(&request_id) {
            Some(request) => println!("{}", serde_json::to_string_pretty(&request)?),
            None => bail!("No handoff request with id {request_id}"),
        },
    }

    Ok(())
}

/// Summary printed by `cache stats`.
#[derive(Debug, Serialize)]
struct CacheSummary {
    entries: usize,
    by_source: BTreeMap<String, usize>,
    by_tag: BTreeMap<String, usize>,
    successes: u64,
    failures: u64,
}

impl CacheSummary {
    fn from_entries(entries: &[CachedResponse]) -> Self {
        let mut summary = Self {
            entries: entries.len(),
            by_source: BTreeMap::new(),
            by_tag: BTreeMap::new(),
            successes: 0,
            failures: 0,
        };
        for entry in entries {
            *summary.by_source.entry(entry.source.clone()).or_default() += 1;
            for tag in &entry.tags {
                *summary.by_tag.entry(tag.clone()).or_default() += 1;
            }
            summary.successes += entry.success_count;
            summary.failures += entry.failure_count;
        }
        summary
    }
}

pub async fn cache(config: &RuntimeConfig, cmd: CacheCommand) -> Result<()> {
    let cache = ResponseCache::open(config.cache.clone())
        .await
        .context("Failed to open response cache")?;

    match cmd {
        CacheCommand::Lookup { prompt, strategy } => {
            let strategies = match strategy {
                Strategy::All => vec![
                    Strategy::Exact,
                    Strategy::Semantic,
                    Strategy::Partial,
                    Strategy::Template,
                ],
                single => vec![single],
            };

            for strategy in strategies {
                let found = match strategy {
                    Strategy::Exact => cache.get_exact(&prompt).await?,
                    Strategy::Semantic => cache.get_semantic(&prompt).await?,
                    Strategy::Partial => cache.get_partial(&prompt).await?,
                    Strategy::Template | Strategy::All => cache.get_template(&prompt).await?,
                };
                match found {
                    Some(entry) => {
                        println!(
                            "{strategy:?}: hit (confidence {:.2}, source {})",
                            entry.confidence_score, entry.source
                        );
                        println!("  prompt:   {}", entry.original_prompt);
                        println!("  response: {}", entry.response);
                    }
                    None => println!("{strategy:?}: miss"),
                }
            }
        }
        CacheCommand::Put {
            prompt,
            response,
            source,
            tag,
        } => {
            let hash = cache.put(&prompt, &response, &source, tag).await?;
            println!("Cached {hash}");
        }
        CacheCommand::Stats { format } => {
            let summary = CacheSummary::from_entries(&cache.entries());
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => {
                    println!("Entries:  {}", summary.entries);
                    println!("Feedback: {} ok / {} bad", summary.successes, summary.failures);
                    for (source, count) in &summary.by_source {
                        println!("  source {source}: {count}");
                    }
                    for (tag, count) in &summary.by_tag {
                        println!("  tag {tag}: {count}");
                    }
                }
            }
        }
    }

    Ok(())
}

pub fn config(config: &RuntimeConfig, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Check => {
            config.validate()?;
            print!("{}", serde_yaml::to_string(config)?);

            let stages: Vec<&str> = FallbackStage::plan(&config.fallback)
                .iter()
                .map(FallbackStage::as_str)
                .collect();
            println!("# cascade: {}", stages.join(" -> "));
            println!("# configuration OK");
        }
    }
    Ok(())
}

pub async fn simulate(config: RuntimeConfig, args: SimulateArgs) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&args.failure_rate),
        "--failure-rate must be between 0.0 and 1.0, got {}",
        args.failure_rate
    );

    let lifeline = Lifeline::open(config).await?;
    tracing::info!(
        operation_id = %args.operation,
        requests = args.requests,
        failure_rate = args.failure_rate,
        "Running simulation"
    );

    let mut context = RequestContext::new().with_model("simulated");
    if args.urgent {
        context = context.urgent();
    }
    if args.premium {
        context = context.with_user_tier(UserTier::Premium);
    }

    for i in 1..=args.requests {
        let rate = args.failure_rate;
        let result = lifeline
            .execute_with_fallbacks(&args.operation, &args.prompt, &context, || {
                let fail = rand::thread_rng().gen_bool(rate);
                async move {
                    if fail {
                        Err(OperationError::timeout("simulated inference timeout"))
                    } else {
                        Ok(format!("Simulated response #{i}"))
                    }
                }
            })
            .await;

        println!(
            "#{i:<3} {:<16} {:<14} {:.2}  {}",
            result.fallback_level.as_str(),
            result.source.as_str(),
            result.confidence,
            preview(&result.result)
        );
    }

    println!("{}", serde_json::to_string_pretty(&lifeline.status())?);
    Ok(())
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
