//! Reflow CLI: validate and replay recorded flows against the stub
//! executor. The real browser integration supplies its own
//! ActionExecutor / FrameBridge / TabChannel implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use executor_api::StubExecutor;
use flow_model::{topological_order, validate_linear_invariant, Flow};
use reflow_cli::stubs::{StubBridge, StubTabChannel};
use reflow_cli::{Engine, EngineConfig};

#[derive(Parser)]
#[command(name = "reflow", version, about = "Record-replay browser automation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a flow file: structure, invariant, topological order.
    Validate {
        /// Path to a flow JSON file
        file: PathBuf,
    },

    /// Print a summary of a flow file.
    Inspect {
        file: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Replay a flow file against the stub executor.
    Run {
        file: PathBuf,
        /// Run variables as key=value pairs
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// Print the run-event log after the run
        #[arg(long)]
        events: bool,
        /// Emit the run result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("reflow=info,warn")
        }))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Validate { file } => {
            let flow = load_flow(&file)?;
            validate_flow(&flow)?;
            println!(
                "ok: {} ({} nodes, {} edges, {} subflows)",
                flow.name,
                flow.nodes.len(),
                flow.edges.len(),
                flow.subflows.len()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Inspect { file, json } => {
            let flow = load_flow(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&flow)?);
            } else {
                println!("flow     {}", flow.name);
                println!("id       {}", flow.id);
                println!("version  {}", flow.version);
                println!("nodes    {}", flow.nodes.len());
                for node in &flow.nodes {
                    let marker = if node.disabled { " (disabled)" } else { "" };
                    println!("  - {} [{}]{}", node.id, node.kind(), marker);
                }
                if !flow.variables.is_empty() {
                    println!("variables");
                    for var in &flow.variables {
                        println!("  - {} ({:?})", var.key, var.var_type);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Run {
            file,
            vars,
            events,
            json,
        } => {
            let flow = load_flow(&file)?;
            validate_flow(&flow)?;
            let vars = parse_vars(&vars)?;

            let config = EngineConfig::load()?;
            let engine = Engine::new(
                Arc::new(StubExecutor::new()),
                Arc::new(StubBridge::new()),
                Arc::new(StubTabChannel::new()),
                config,
            );

            info!(flow = %flow.name, "starting run");
            let started = std::time::Instant::now();
            let result = engine.run_flow_blocking(flow, vars).await;
            let took = humantime::format_duration(std::time::Duration::from_millis(
                started.elapsed().as_millis() as u64,
            ));

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{}: {} attempted, {} succeeded, {} failed in {}",
                    if result.success { "success" } else { "failed" },
                    result.summary.attempted,
                    result.summary.succeeded,
                    result.summary.failed,
                    took
                );
                if let Some(error) = &result.error {
                    println!("error: {error}");
                }
                for entry in &result.logs {
                    let duration = entry
                        .duration_ms
                        .map(|ms| format!(" ({ms}ms)"))
                        .unwrap_or_default();
                    println!(
                        "  {} [{:?}] {} - {}{duration}",
                        entry.at.format("%H:%M:%S%.3f"),
                        entry.status,
                        entry.node_id,
                        entry.message
                    );
                }
            }

            if events {
                for event in engine.run_events(&result.run_id).await {
                    println!(
                        "  #{} {} {}",
                        event.seq,
                        event.kind,
                        event.node_id.as_deref().unwrap_or("-")
                    );
                }
            }

            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn load_flow(path: &Path) -> Result<Flow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading flow file {}", path.display()))?;
    // an unknown step "type" surfaces here as an unsupported-step error
    serde_json::from_str(&raw).with_context(|| format!("parsing flow file {}", path.display()))
}

fn validate_flow(flow: &Flow) -> Result<()> {
    topological_order(&flow.nodes, &flow.edges)
        .with_context(|| "flow graph is not executable".to_string())?;
    if !flow.subflows.is_empty() {
        for (id, sub) in &flow.subflows {
            topological_order(&sub.nodes, &sub.edges)
                .with_context(|| format!("subflow '{id}' is not executable"))?;
        }
    }
    if flow.edges.iter().all(|e| e.is_default())
        && !validate_linear_invariant(&flow.nodes, &flow.edges)
    {
        bail!("linear flow violates the chain invariant; re-save it to repair");
    }
    Ok(())
}

fn parse_vars(pairs: &[String]) -> Result<HashMap<String, Value>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--var expects KEY=VALUE, got '{pair}'");
        };
        // values parse as JSON when possible, else as plain strings
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}
