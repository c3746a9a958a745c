//! Blueprint CLI
//!
//! Runs, validates and lists blueprint graphs from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use blueprint_cli::{load_blueprint, load_config, parse_assignment};
use blueprint_runtime::{Engine, ExecutionRequest, ExecutionResult, NodeRegistry};

/// Blueprint execution engine
#[derive(Parser, Debug)]
#[command(name = "blueprint")]
#[command(about = "Run and inspect blueprint graphs", long_about = None)]
struct Args {
    /// Engine configuration file (TOML); defaults plus BLUEPRINT_* environment otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a blueprint file
    Run {
        /// Blueprint file (.json or .toml)
        file: PathBuf,

        /// User the execution runs as
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Entry input as PIN=VALUE (repeatable)
        #[arg(short, long = "input", value_name = "PIN=VALUE")]
        inputs: Vec<String>,

        /// Variable override as NAME=VALUE (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Print the full execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a blueprint file without running it
    Validate {
        /// Blueprint file (.json or .toml)
        file: PathBuf,
    },

    /// List the available node types
    Nodes {
        /// Only this category
        #[arg(long)]
        category: Option<String>,

        /// Print definitions as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);

    match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("blueprint=info,blueprint_runtime=warn")),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn dispatch(args: Args) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let engine = Engine::new(Arc::new(NodeRegistry::with_builtins()), config);

    match args.command {
        Command::Run {
            file,
            user,
            inputs,
            vars,
            json,
        } => {
            let mut request = ExecutionRequest::new(&user);
            for raw in &inputs {
                let (pin, value) = parse_assignment(raw)?;
                request = request.with_input(&pin, value);
            }
            for raw in &vars {
                let (name, value) = parse_assignment(raw)?;
                request = request.with_variable(&name, value);
            }
            let blueprint = Arc::new(load_blueprint(&file)?);
            info!("Running blueprint {} ({})", blueprint.name, blueprint.id);

            let result = run(&engine, blueprint, request).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result)?;
            }
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Validate { file } => {
            let blueprint = load_blueprint(&file)?;
            match engine.validate(&blueprint) {
                Ok(()) => {
                    println!("{}: ok ({} nodes)", file.display(), blueprint.nodes.len());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("{}: {}", file.display(), e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Nodes { category, json } => {
            let registry = engine.registry();
            let mut definitions = match &category {
                Some(category) => registry.nodes_in_category(category),
                None => registry.definitions(),
            };
            definitions.sort_by(|a, b| {
                (&a.metadata.category, &a.metadata.type_id).cmp(&(&b.metadata.category, &b.metadata.type_id))
            });
            if json {
                println!("{}", serde_json::to_string_pretty(&definitions)?);
            } else {
                for def in definitions {
                    println!(
                        "{:<16} {:<20} {}",
                        def.metadata.category, def.metadata.type_id, def.metadata.name
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Execute, aborting the run on Ctrl+C
async fn run(
    engine: &Engine,
    blueprint: Arc<blueprint_types::Blueprint>,
    request: ExecutionRequest,
) -> ExecutionResult {
    let execution_id = format!("cli-{}", std::process::id());
    let request = request.with_execution_id(&execution_id);

    let abort_on_interrupt = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, aborting execution");
            engine.abort(&execution_id);
        }
        std::future::pending::<ExecutionResult>().await
    };

    tokio::select! {
        result = engine.execute(blueprint, request) => result,
        result = abort_on_interrupt => result,
    }
}

fn print_summary(result: &ExecutionResult) -> Result<()> {
    let status = match (result.success, result.cancelled) {
        (true, _) => "succeeded",
        (false, true) => "cancelled",
        (false, false) => "failed",
    };
    println!(
        "execution {} {} ({} node runs, {}ms)",
        result.execution_id, status, result.usage.node_executions, result.usage.elapsed_ms
    );

    for (name, value) in &result.outputs {
        println!("  {} = {}", name, serde_json::to_string(value)?);
    }
    if let Some(err) = &result.error {
        println!("  error: {}", err);
    }
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}
