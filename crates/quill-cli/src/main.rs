mod approval;
mod logging;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use quill_agent::scheduler::PlanSpec;
use quill_agent::{
    AgentRuntime, ApprovalGate, ApprovalPolicy, AutoApprove, CompressionEngine, LlmSummarizer,
    PlanRunner, RuntimeSettings, Scheduler, StopReason, TaskPlan, TaskStatus, ToolTaskWorker,
};
use quill_core::config::Config;
use quill_core::thread::Thread;
use quill_core::types::ToolCall;
use quill_providers::{AdapterRegistry, Credentials, RetryPolicy};
use quill_tools::ToolExecutor;

#[derive(Parser)]
#[command(name = "quill", about = "Coding agent execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.quill/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (one-shot, or interactive when no prompt is given)
    Run {
        /// Request to send
        prompt: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Provider id from models.providers
        #[arg(long)]
        provider: Option<String>,

        /// Workspace directory
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Approve every tool call without asking
        #[arg(short, long)]
        yes: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Execute a task plan file (JSON5) through the scheduler
    Plan {
        file: PathBuf,

        /// Workspace directory
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Run tasks that need approval without asking
        #[arg(short, long)]
        yes: bool,

        /// Print the final plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available protocol adapters
    Adapters,

    /// List the built-in tools
    Tools {
        /// Print full definitions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    logging::init(config.logging.as_ref(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Run {
            prompt,
            model,
            provider,
            workspace,
            yes,
            json,
        } => {
            let options = RunOptions {
                model,
                provider,
                workspace,
                yes,
            };
            let runtime = build_runtime(&config, &options)?;
            match prompt {
                Some(prompt) => {
                    let mut thread = Thread::new();
                    let result = run_once(&runtime, &mut thread, &prompt, json).await?;
                    if result != StopReason::Completed {
                        std::process::exit(1);
                    }
                }
                None => interactive(&runtime, json).await?,
            }
        }
        Commands::Plan {
            file,
            workspace,
            yes,
            json,
        } => {
            let ok = run_plan(&config, &file, workspace, yes, json).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Adapters => {
            let registry = AdapterRegistry::from_config(&config);
            let mut ids: Vec<&str> = registry.ids().collect();
            ids.sort_unstable();
            for id in ids {
                if let Some(adapter) = registry.get(id) {
                    println!("{id:<12} {}{}", adapter.request.base_url, adapter.request.endpoint);
                }
            }
        }
        Commands::Tools { json } => {
            let tools = quill_tools::catalog::definitions();
            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
            } else {
                for tool in tools {
                    let approval = format!("{:?}", tool.approval_type).to_lowercase();
                    println!("{:<22} {approval:<10} {}", tool.name, tool.description);
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let registry = AdapterRegistry::with_builtin();
                let known: Vec<&str> = registry.ids().collect();
                let (warnings, errors) = config.validate(&known);
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if errors.is_empty() {
                    println!("Config OK ({})", config_path.display());
                } else {
                    std::process::exit(1);
                }
            }
        },
    }

    Ok(())
}

struct RunOptions {
    model: Option<String>,
    provider: Option<String>,
    workspace: Option<PathBuf>,
    yes: bool,
}

fn build_runtime(config: &Config, options: &RunOptions) -> anyhow::Result<AgentRuntime> {
    let provider = match &options.provider {
        Some(id) => config
            .provider(id)
            .with_context(|| format!("provider '{id}' is not in models.providers"))?,
        None => config
            .active_provider()
            .context("no provider configured (add one under models.providers)")?,
    };
    let registry = AdapterRegistry::from_config(config);
    let adapter = registry
        .build(provider.adapter_id(), RetryPolicy::from(&config.retry()))
        .with_context(|| format!("unknown adapter '{}'", provider.adapter_id()))?;
    let credentials = Credentials {
        api_key: provider.resolve_api_key(),
        base_url: provider.base_url.clone(),
    };

    let mut settings = RuntimeSettings::from_config(config);
    if let Some(model) = options
        .model
        .clone()
        .or_else(|| options.provider.as_ref().and(provider.default_model.clone()))
    {
        settings.model = model;
    }
    if settings.model.is_empty() {
        anyhow::bail!("no model configured (set agent.model or pass --model)");
    }
    if let Some(workspace) = &options.workspace {
        settings.workspace = workspace.clone();
    }
    tracing::info!(
        provider = %provider.id,
        adapter = provider.adapter_id(),
        model = %settings.model,
        workspace = %settings.workspace.display(),
        "Runtime configured"
    );

    let gate: Arc<dyn ApprovalGate> = if options.yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(approval::PromptGate)
    };
    let compression = config.compression();
    let summarizer = compression
        .llm_summary
        .then(|| LlmSummarizer::new(adapter.clone(), credentials.clone(), settings.model.clone()));

    let mut runtime = AgentRuntime::new(
        adapter,
        credentials,
        Arc::new(ToolExecutor::from_config(config)),
        settings,
    )
    .with_approval(gate, ApprovalPolicy::from_config(config))
    .with_compression(CompressionEngine::from_config(&compression));
    if let Some(summarizer) = summarizer {
        runtime = runtime.with_summarizer(summarizer);
    }
    Ok(runtime)
}

/// One turn with Ctrl-C wired to cancellation.
async fn run_once(
    runtime: &AgentRuntime,
    thread: &mut Thread,
    prompt: &str,
    json: bool,
) -> anyhow::Result<StopReason> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(render::print_events(rx, json));
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = runtime.run_turn(thread, prompt, tx, cancel).await;
    watcher.abort();
    let _ = printer.await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!();
        match result.stop_reason {
            StopReason::Completed => {}
            StopReason::MaxIterations => eprintln!("[stopped after {} model calls]", result.iterations),
            StopReason::Aborted => eprintln!("[aborted]"),
            StopReason::Error => {}
            StopReason::Handoff => {
                eprintln!("[context exhausted; continue in a new session with this handoff]");
                if let Some(doc) = &result.handoff {
                    println!("{}", doc.to_markdown());
                }
            }
        }
    }
    Ok(result.stop_reason)
}

async fn interactive(runtime: &AgentRuntime, json: bool) -> anyhow::Result<()> {
    let mut thread = Thread::new();
    loop {
        let line = tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt("quill")
                .allow_empty(true)
                .interact_text()
        })
        .await??;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if run_once(runtime, &mut thread, line, json).await? == StopReason::Handoff {
            thread = Thread::new();
        }
    }
    Ok(())
}

async fn run_plan(
    config: &Config,
    file: &Path,
    workspace: Option<PathBuf>,
    yes: bool,
    json: bool,
) -> anyhow::Result<bool> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let spec: PlanSpec = json5::from_str(&raw).with_context(|| format!("invalid plan file {}", file.display()))?;
    let mut plan = TaskPlan::from_spec(spec)?;

    let policy = ApprovalPolicy::from_config(config);
    let gated: Vec<String> = plan
        .tasks()
        .iter()
        .filter_map(|t| {
            let tool = t.tool.as_ref()?;
            let call = ToolCall::new(&t.id, &tool.name, tool.arguments.clone());
            policy
                .requires_approval(&call)
                .map(|_| format!("{}: {}", t.id, approval::describe(&call)))
        })
        .collect();
    if !gated.is_empty() && !yes {
        eprintln!("These tasks need approval:");
        for line in &gated {
            eprintln!("  {line}");
        }
        let confirmed = tokio::task::spawn_blocking(|| {
            dialoguer::Confirm::new()
                .with_prompt("Run the plan?")
                .default(false)
                .interact()
        })
        .await??;
        if !confirmed {
            anyhow::bail!("plan not approved");
        }
    }

    let workspace = workspace.unwrap_or_else(|| config.workspace_dir());
    let executor = Arc::new(ToolExecutor::from_config(config));
    let scheduler_config = config.scheduler();
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(render::print_events(rx, false));

    let mut runner = PlanRunner::new(
        Scheduler::from_config(&scheduler_config),
        Arc::new(ToolTaskWorker::new(executor, workspace)),
    )
    .with_max_retries(scheduler_config.max_retries)
    .with_events(tx);

    let pause = runner.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            pause.cancel();
        }
    });
    let reports = runner.run(&mut plan).await;
    watcher.abort();
    let stats = runner.scheduler().stats(&plan);
    if !plan.is_complete() {
        runner.scheduler_mut().stop(&mut plan);
    }
    drop(runner);
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        for report in &reports {
            if let Some(output) = report.output.as_deref().or(report.error.as_deref()) {
                println!("## {} ({})\n{}\n", report.task_id, report.status.as_str(), output.trim_end());
            }
        }
        println!(
            "{} tasks: {} completed, {} failed, {} skipped, {} pending ({} ms)",
            stats.total, stats.completed, stats.failed, stats.skipped, stats.pending, stats.elapsed_ms
        );
    }
    Ok(stats.is_complete && reports.iter().all(|r| r.status == TaskStatus::Completed))
}
