//! Deterministic code-change orchestration CLI.
//!
//! Runs a task through the capability pipeline rooted at `--root` and prints
//! the result as JSON. Every run leaves a record under `.factory/runs/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use factory::core::types::{RunResult, codes};
use factory::exit_codes;
use factory::io::init::{InitOptions, init_workspace, new_capability};
use factory::logging;
use factory::orchestrator::Orchestrator;
use factory::registry::{InvokeError, RegistryError};

#[derive(Parser)]
#[command(
    name = "factory",
    version,
    about = "Deterministic code-change orchestration"
)]
struct Cli {
    /// Repository root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `factory.toml`, the built-in capability descriptors and `.factory/.gitignore`.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Execute one task and print its result.
    Run {
        /// Path to a task JSON file.
        #[arg(long, conflicts_with = "input", required_unless_present = "input")]
        task: Option<PathBuf>,
        /// Task JSON given inline.
        #[arg(long)]
        input: Option<String>,
    },
    /// Inspect and call registered capabilities.
    Capability {
        #[command(subcommand)]
        command: CapabilityCommand,
    },
}

#[derive(Subcommand)]
enum CapabilityCommand {
    /// Print every capability name.
    List,
    /// Check one descriptor.
    Validate { name: String },
    /// Check every descriptor.
    ValidateAll,
    /// Write a descriptor stub for a new capability.
    New { name: String },
    /// Call a capability directly and print its envelope.
    Invoke {
        name: String,
        /// Input JSON.
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Run { task, input } => cmd_run(&cli.root, task.as_deref(), input.as_deref()),
        Command::Capability { command } => match command {
            CapabilityCommand::List => cmd_list(&cli.root),
            CapabilityCommand::Validate { name } => cmd_validate(&cli.root, &name),
            CapabilityCommand::ValidateAll => cmd_validate_all(&cli.root),
            CapabilityCommand::New { name } => cmd_new(&cli.root, &name),
            CapabilityCommand::Invoke { name, input } => cmd_invoke(&cli.root, &name, &input),
        },
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let report = init_workspace(root, &InitOptions { force })?;
    emit(&json!({
        "event": "init",
        "config": report.config_path.display().to_string(),
        "descriptors": report.descriptor_paths.len(),
    }))?;
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, task: Option<&Path>, input: Option<&str>) -> Result<i32> {
    let raw = match (task, input) {
        (Some(path), _) => {
            fs::read_to_string(path).with_context(|| format!("read task {}", path.display()))?
        }
        (None, Some(inline)) => inline.to_string(),
        (None, None) => anyhow::bail!("either --task or --input is required"),
    };
    let value: Value = serde_json::from_str(&raw).context("parse task json")?;
    let orchestrator = Orchestrator::from_root(root)?;
    let result = orchestrator.execute_value(&value);
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("serialize result")?
    );
    Ok(run_exit_code(&result))
}

fn run_exit_code(result: &RunResult) -> i32 {
    if result.ok {
        exit_codes::OK
    } else if result.has_error(codes::SUB_AGENT_INVOCATION_FAILED) {
        exit_codes::WIRING
    } else {
        exit_codes::FAILED
    }
}

fn cmd_list(root: &Path) -> Result<i32> {
    let orchestrator = Orchestrator::from_root(root)?;
    for name in orchestrator.invoker().registry().list()? {
        println!("{name}");
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path, name: &str) -> Result<i32> {
    let orchestrator = Orchestrator::from_root(root)?;
    let errors = match orchestrator.invoker().registry().resolve(name) {
        Ok(_) => Vec::new(),
        Err(RegistryError::InvalidDescriptor { errors, .. }) => errors,
        Err(err) => vec![err.to_string()],
    };
    let ok = errors.is_empty();
    emit(&json!({
        "event": "capability.validate",
        "capability": name,
        "ok": ok,
        "errors": errors,
    }))?;
    Ok(if ok { exit_codes::OK } else { exit_codes::FAILED })
}

fn cmd_validate_all(root: &Path) -> Result<i32> {
    let orchestrator = Orchestrator::from_root(root)?;
    let report = orchestrator.invoker().registry().validate_all()?;
    let failed: Vec<Value> = report
        .iter()
        .filter(|(_, errors)| !errors.is_empty())
        .map(|(name, errors)| json!({ "capability": name, "errors": errors }))
        .collect();
    let ok = failed.is_empty();
    emit(&json!({
        "event": "capability.validate-all",
        "ok": ok,
        "count": report.len(),
        "failed": failed,
    }))?;
    Ok(if ok { exit_codes::OK } else { exit_codes::FAILED })
}

fn cmd_new(root: &Path, name: &str) -> Result<i32> {
    let orchestrator = Orchestrator::from_root(root)?;
    let path = new_capability(orchestrator.invoker().registry().dir(), name)?;
    emit(&json!({
        "event": "capability.new",
        "path": path.display().to_string(),
    }))?;
    Ok(exit_codes::OK)
}

fn cmd_invoke(root: &Path, name: &str, input: &str) -> Result<i32> {
    let input: Value = serde_json::from_str(input).context("parse --input json")?;
    let orchestrator = Orchestrator::from_root(root)?;
    match orchestrator.invoker().invoke(name, &input) {
        Ok(envelope) => {
            let ok = envelope.ok;
            emit(&json!({
                "event": "capability.invoke",
                "capability": name,
                "ok": ok,
                "result": envelope,
            }))?;
            Ok(if ok { exit_codes::OK } else { exit_codes::FAILED })
        }
        Err(err) => {
            emit(&json!({
                "event": "capability.invoke",
                "capability": name,
                "ok": false,
                "error": err.to_string(),
            }))?;
            Ok(invoke_error_code(&err))
        }
    }
}

fn invoke_error_code(err: &InvokeError) -> i32 {
    match err {
        InvokeError::Registry(RegistryError::InvalidName(_)) => exit_codes::INVALID,
        _ => exit_codes::WIRING,
    }
}

/// Print one JSON event line.
fn emit(event: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(event).context("serialize event")?
    );
    Ok(())
}
