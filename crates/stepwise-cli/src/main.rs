//! stepwise - plan-and-execute coding agent CLI

mod checkpoints;
mod config;
mod render;

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use stepwise_agent::{Agent, AgentRunState};
use stepwise_ai::{Model, Provider, RetryConfig, RetryingPolicy, SharedPolicy};
use tracing_subscriber::EnvFilter;

use checkpoints::CheckpointStore;
use config::Config;

/// stepwise - plan, then execute, one step at a time
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task or question for the agent
    task: Option<String>,

    /// Project directory the agent works in
    #[arg(short = 'C', long, default_value = ".")]
    project: PathBuf,

    /// Model to use (default: claude-sonnet-4-5-20250929)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (anthropic, openai, groq, openrouter, ollama, custom)
    #[arg(short, long)]
    provider: Option<String>,

    /// Endpoint override for the provider
    #[arg(long)]
    base_url: Option<String>,

    /// Operator metadata passed to every prompt (repeatable)
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    metadata: Vec<(String, String)>,

    /// Do not commit and push when the task finishes
    #[arg(long)]
    no_finalize: bool,

    /// Resume a checkpointed run by ID (a unique prefix is enough)
    #[arg(long)]
    resume: Option<String>,

    /// List checkpointed runs
    #[arg(long)]
    runs: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("stepwise=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_policy(args: &Args, config: &Config) -> anyhow::Result<(Model, SharedPolicy)> {
    let provider_name = args
        .provider
        .as_deref()
        .or(config.provider.as_deref())
        .unwrap_or(config::DEFAULT_PROVIDER);
    let provider = Provider::parse(provider_name);
    let model_id = args
        .model
        .as_deref()
        .or(config.model.as_deref())
        .unwrap_or(config::DEFAULT_MODEL);

    let mut model = Model::new(provider, model_id);
    if let Some(url) = args.base_url.as_ref().or(config.base_url.as_ref()) {
        model.base_url = url.clone();
    }
    if let Some(max_tokens) = config.max_tokens {
        model.max_tokens = max_tokens;
    }
    if let Some(secs) = config.request_timeout_secs {
        model.request_timeout_secs = secs;
    }

    let api_key = config.get_api_key(provider);
    let client = stepwise_ai::providers::policy_for(&model, api_key.as_deref()).with_context(|| {
        match provider.api_key_env_var() {
            Some(var) => format!(
                "cannot use {} (set {var} or api_keys in {})",
                provider.name(),
                Config::config_path().display()
            ),
            None => format!("cannot use {}", provider.name()),
        }
    })?;

    let mut retry = RetryConfig::default();
    if let Some(retries) = config.retries {
        retry.max_retries = retries;
    }
    let policy: SharedPolicy = Arc::new(RetryingPolicy::new(client).with_retry_config(retry));
    Ok((model, policy))
}

/// First eight characters of a run id, for listings
fn short_id(run_id: &str) -> String {
    run_id.chars().take(8).collect()
}

fn list_runs(store: &CheckpointStore) -> anyhow::Result<()> {
    let runs = store.list()?;
    if runs.is_empty() {
        println!("No saved runs in {}", store.dir().display());
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {:<12} {}  ({})",
            short_id(&run.run_id),
            run.updated_at.format("%Y-%m-%d %H:%M"),
            run.status,
            render::truncate_chars(&run.task, 60),
            run.project.display()
        );
    }
    Ok(())
}

fn print_outcome(state: &AgentRunState) {
    if let Some(answer) = &state.answer {
        println!("\n{}", answer.trim());
        return;
    }
    println!("\nCompleted {} step(s).", state.steps.len());
    if let Some(outcome) = &state.finalize {
        println!("Finalize: {outcome}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.init_config {
        let path = Config::init()?;
        println!("Config file: {}", path.display());
        return Ok(());
    }

    let store = CheckpointStore::new(CheckpointStore::default_dir());
    if args.runs {
        return list_runs(&store);
    }

    let resumed = match &args.resume {
        Some(id) => Some(
            store
                .load(id)
                .with_context(|| format!("cannot load run {id}"))?,
        ),
        None => None,
    };
    if resumed.is_none() && args.task.is_none() {
        anyhow::bail!("no task given (pass a task, or --resume <id>)");
    }

    let config = Config::load();
    let (model, policy) = build_policy(&args, &config)?;
    tracing::debug!(model = %model.id, provider = %model.provider.name(), "policy ready");

    let mut agent_config = config.agent_config();
    if args.no_finalize {
        agent_config.finalize = false;
    }
    let mut agent = Agent::new(agent_config, policy);

    let hook_store = store.clone();
    agent.set_checkpoint_hook(move |state| {
        if let Err(e) = hook_store.save(state) {
            tracing::warn!(run_id = %state.run_id, "failed to save checkpoint: {e}");
        }
    });

    let mut receiver = agent.subscribe();
    let verbose = args.verbose;
    let printer = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(line) = render::format_event(&event, verbose) {
                        println!("{line}");
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("event printer skipped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let abort = agent.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted; stopping after the current turn.");
            abort.abort();
        }
    });

    let result = match resumed {
        Some(state) => agent.resume(state).await,
        None => {
            let task = args.task.as_deref().unwrap_or_default();
            let metadata: BTreeMap<String, String> = args.metadata.iter().cloned().collect();
            agent.run(task, &args.project, metadata).await
        }
    };

    interrupt.abort();
    drop(agent);
    let _ = printer.await;

    match result {
        Ok(state) => {
            print_outcome(&state);
            Ok(())
        }
        Err(e) => {
            if e.is_policy_transport() {
                eprintln!("The model API call failed; check the provider settings.");
            }
            if let Some(run_id) = e.run_id() {
                eprintln!("Run {run_id} stopped; resume with: stepwise --resume {run_id}");
            }
            Err(e.into())
        }
    }
}
