//! agentflow CLI
//!
//! Usage:
//!   agentflow run workflows/create-story.toml --yolo
//!   agentflow resume workflows/create-story.toml
//!   agentflow status create-story
//!   agentflow validate workflows/create-story/instructions.md
//!   agentflow personas

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use agentflow::engine::checkpoint::{
    AutoApproveCheckpointHandler, InteractiveCheckpointHandler, NoInput, StdinInputProvider,
};
use agentflow::events::EventReceiver;
use agentflow::workflow::FileWorkflowLoader;
use agentflow::{
    event_channel, parse, AgentPool, CancellationFlag, DefaultLlmFactory, EventSink, FileConfig,
    FileStateStore, StateStore, WorkflowEngine, WorkflowLoader, WorkflowStatus,
};

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Run multi-agent workflows with checkpoints and a bounded agent pool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the nearest .agentflow.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ollama server URL
    #[arg(long, env = "OLLAMA_URL", global = true)]
    ollama_url: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Workflow manifest (.toml) or instruction document
    workflow: PathBuf,

    /// Override the workflow id used for checkpoints
    #[arg(long)]
    id: Option<String>,

    /// Skip optional steps and prompts, auto-approve output
    #[arg(long)]
    yolo: bool,

    /// Auto-approve checkpoints and pause on questions instead of prompting
    #[arg(long)]
    non_interactive: bool,

    /// Project root exposed as {project-root}
    #[arg(long)]
    project_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow, resuming its checkpoint if one exists
    Run {
        #[command(flatten)]
        args: RunArgs,

        /// Discard any stored checkpoint first
        #[arg(long)]
        fresh: bool,
    },
    /// Resume a paused or failed workflow
    Resume {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Show the stored checkpoint for a workflow id
    Status {
        workflow_id: String,
    },
    /// Parse a workflow and list its steps
    Validate {
        workflow: PathBuf,
    },
    /// List available personas
    Personas,
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = match &cli.config {
        Some(path) => FileConfig::load_from_path(path)?,
        None => FileConfig::load()?,
    };

    match cli.command {
        Commands::Run { args, fresh } => run(config, cli.ollama_url, args, fresh, false).await,
        Commands::Resume { args } => run(config, cli.ollama_url, args, false, true).await,
        Commands::Status { workflow_id } => status(&config, &workflow_id).await,
        Commands::Validate { workflow } => validate(&workflow),
        Commands::Personas => {
            let registry = config.persona_registry();
            println!("Personas:\n");
            for (name, persona) in registry.iter() {
                let temperature = persona
                    .temperature
                    .map(|t| format!(" (temperature {})", t))
                    .unwrap_or_default();
                println!("  {:<14} {}{}", name, persona.display_name, temperature);
            }
            Ok(())
        }
    }
}

async fn run(
    config: FileConfig,
    ollama_url: Option<String>,
    args: RunArgs,
    fresh: bool,
    require_checkpoint: bool,
) -> Result<()> {
    let mut definition = FileWorkflowLoader::new()
        .load(&args.workflow)
        .with_context(|| format!("Failed to load workflow {}", args.workflow.display()))?;
    if let Some(id) = args.id {
        definition.id = id;
    }

    let store = Arc::new(FileStateStore::new(&config.engine.state_dir));
    if fresh {
        store.clear_state(&definition.id).await?;
    }
    if require_checkpoint && store.load_state(&definition.id).await?.is_none() {
        bail!("No checkpoint stored for workflow '{}'", definition.id);
    }

    let (sender, receiver) = event_channel();
    let events = EventSink::new(sender);
    let event_log = tokio::spawn(log_events(receiver));

    let url = ollama_url.unwrap_or_else(|| config.llm.url.clone());
    let pool = AgentPool::builder(Arc::new(DefaultLlmFactory::new(url)))
        .config(config.pool_config())
        .personas(Arc::new(config.persona_registry()))
        .pricing(config.pricing_table())
        .events(events.clone())
        .build();
    let monitor = pool.start_health_monitor();

    let mut engine_config = config.engine_config();
    engine_config.yolo |= args.yolo;
    let project_root = match args.project_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    engine_config = engine_config.with_project_root(project_root);

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, pausing after the current step");
            on_signal.cancel();
        }
    });

    let mut engine = WorkflowEngine::new(definition, pool.clone(), store)
        .with_config(engine_config)
        .with_project_config(Arc::new(config))
        .with_events(events)
        .with_cancellation(cancel);
    if !args.non_interactive {
        engine = engine
            .with_checkpoint_handler(Arc::new(InteractiveCheckpointHandler))
            .with_input_provider(Arc::new(StdinInputProvider));
    } else {
        engine = engine
            .with_checkpoint_handler(Arc::new(AutoApproveCheckpointHandler))
            .with_input_provider(Arc::new(NoInput));
    }

    let result = engine.execute().await;

    monitor.stop();
    pool.shutdown().await;
    let costs = pool.cost_metrics();
    drop(engine);
    drop(pool);
    let _ = event_log.await;

    let outcome = result?;
    println!(
        "\nWorkflow '{}' {} at step {}",
        outcome.workflow_id, outcome.status, outcome.current_step_number
    );
    if !outcome.skipped_steps.is_empty() {
        println!("Skipped optional steps: {:?}", outcome.skipped_steps);
    }
    println!(
        "Cost: ${:.4} over {} invocation(s), {} tokens in / {} out",
        costs.total, costs.invocations, costs.tokens_in, costs.tokens_out
    );
    if outcome.status == WorkflowStatus::Paused {
        println!("Resume with: agentflow resume {}", args.workflow.display());
    }
    Ok(())
}

async fn log_events(mut receiver: EventReceiver) {
    while let Some(event) = receiver.recv().await {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event = event.name(), %payload, "Event"),
            Err(e) => tracing::warn!(error = %e, "Unserializable event"),
        }
    }
}

async fn status(config: &FileConfig, workflow_id: &str) -> Result<()> {
    let store = FileStateStore::new(&config.engine.state_dir);
    match store.load_state(workflow_id).await? {
        Some(state) => {
            println!("Workflow:    {}", state.workflow_id);
            println!("Status:      {}", state.status);
            println!("Step:        {}", state.current_step_number);
            println!("Started:     {}", state.start_time);
            println!("Updated:     {}", state.last_update);
            println!("Goto jumps:  {}", state.jumps_taken);
            if let Some(target) = state.jump_target {
                println!("Jump target: {}", target);
            }
            if let Some(error) = &state.error {
                println!("Error:       {}", error);
            }
            if !state.variables.is_empty() {
                println!("\nVariables:\n{}", serde_json::to_string_pretty(&state.variables)?);
            }
        }
        None => println!("No checkpoint for '{}'", workflow_id),
    }
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let definition = FileWorkflowLoader::new().load(path)?;
    let steps = parse(&definition.instructions)?;

    println!("Workflow: {} ({} steps)\n", definition.id, steps.len());
    for step in &steps {
        let mut flags = Vec::new();
        if step.optional {
            flags.push("optional");
        }
        if step.critical {
            flags.push("critical");
        }
        let agent = step.agent.as_deref().unwrap_or("-");
        println!(
            "  {:>3}. {:<40} agent={} {}",
            step.number,
            step.goal,
            agent,
            flags.join(",")
        );
        for item in step.items() {
            if let agentflow::workflow::StepItem::Action(action) = item {
                println!("       line {:>4}  {}", action.line, action.kind.tag());
            }
        }
    }
    Ok(())
}
