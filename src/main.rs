//! Custodian Runtime
//!
//! Entry point for the self-update safety workflow. Handles CLI args,
//! bootstrapping, and the interactive operator loop that routes each
//! message through the classifier, orchestrator, and safety gate.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::{Input, Select};

use custodian::backend::BackendHttpClient;
use custodian::classifier::classify;
use custodian::config::{load_config, resolve_path, save_config, WorkspacePaths};
use custodian::error::WorkflowError;
use custodian::state::{audit, Database};
use custodian::types::{default_config, ChatOutcome, CustodianConfig, LogLevel, PackageState};
use custodian::workflow::gate::GateAction;
use custodian::workflow::{Orchestrator, UpdateRun};

const VERSION: &str = "0.1.0";

/// Custodian -- gated self-update workflow for an assistant runtime
#[derive(Parser, Debug)]
#[command(
    name = "custodian",
    version = VERSION,
    about = "Custodian -- gated self-update workflow",
    long_about = "Converses with a code-generation backend and deploys changes to its own \
                  source only through a backed-up, tested, operator-gated workflow."
)]
struct Cli {
    /// Start the interactive operator loop
    #[arg(long)]
    run: bool,

    /// Show current configuration, active package, and recent deployments
    #[arg(long)]
    status: bool,

    /// Restore the most recent backup over the live tree
    #[arg(long)]
    rollback: bool,

    /// Print the self-update audit report
    #[arg(long)]
    audit: bool,
}

// ---- Bootstrap --------------------------------------------------------------

fn init_tracing(level: &LogLevel) {
    let max = match level {
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    };
    tracing_subscriber::fmt()
        .with_max_level(max)
        .with_target(false)
        .init();
}

/// Load the config, writing the defaults on first run.
fn load_or_create_config() -> Result<CustodianConfig> {
    if let Some(config) = load_config() {
        return Ok(config);
    }
    let config = default_config();
    save_config(&config).context("Failed to write initial config")?;
    Ok(config)
}

fn open_database(config: &CustodianConfig) -> Result<Database> {
    Database::open(&resolve_path(&config.db_path))
}

fn build_orchestrator(config: &CustodianConfig, db: Arc<Mutex<Database>>) -> Orchestrator {
    let paths = WorkspacePaths::from_config(config);
    let backend = Arc::new(BackendHttpClient::new(config.backend_url.clone()));
    Orchestrator::new(paths, db, backend)
}

// ---- Status Command ---------------------------------------------------------

/// Display configuration, the active package, and recent deployments.
fn show_status(config: &CustodianConfig, db: &Database) -> Result<()> {
    println!(
        r#"
=== CUSTODIAN STATUS ===
Live root:  {}
Backend:    {}
DB path:    {}
Version:    {}
========================"#,
        config.live_root, config.backend_url, config.db_path, config.version,
    );

    match db.get_active_package()? {
        Some(package) => {
            let status = package
                .test_report
                .as_ref()
                .map(|r| format!("{:?}", r.status))
                .unwrap_or_else(|| "none".to_string());
            println!(
                "Active package: {} (state {:?}, tests {})",
                package.id, package.state, status
            );
        }
        None => println!("Active package: none"),
    }

    let deployments = db.get_recent_deployments(5)?;
    if deployments.is_empty() {
        println!("Deployments: none recorded");
    } else {
        println!("Recent deployments:");
        for record in deployments {
            println!(
                "  [{}] {:?} (package {}, backup {})",
                record.timestamp,
                record.outcome,
                record.package_id.as_deref().unwrap_or("-"),
                record.backup_id,
            );
        }
    }

    Ok(())
}

// ---- Operator Loop ----------------------------------------------------------

/// The interactive loop: classify each message, run the matching path,
/// and put every gate decision in front of the operator.
async fn run_loop(config: &CustodianConfig) -> Result<()> {
    let db = Arc::new(Mutex::new(open_database(config)?));
    let orchestrator = build_orchestrator(config, db);

    println!(
        "{}",
        format!("Custodian v{VERSION} ready. Type a request, or 'exit' to quit.").cyan()
    );

    loop {
        let line: String = Input::new()
            .with_prompt(format!("  {} you", "\u{2192}".cyan()))
            .allow_empty(true)
            .interact_text()?;
        let line = line.trim().to_string();

        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let request = classify(&line);

        if request.is_self_update {
            println!(
                "{}",
                "Self-update detected. Backing up and preparing a staged change...".yellow()
            );
            match orchestrator.begin_self_update(&request).await {
                Ok(run) => handle_update_run(&orchestrator, run).await?,
                Err(e) => print_workflow_error(&e),
            }
        } else {
            match orchestrator.chat(&request).await {
                Ok((outcome, decision)) => {
                    handle_chat_outcome(&orchestrator, outcome, decision.permitted).await?
                }
                Err(e) => print_workflow_error(&e),
            }
        }
    }

    Ok(())
}

/// Present a staged self-update package and act on the operator's choice.
async fn handle_update_run(orchestrator: &Orchestrator, run: UpdateRun) -> Result<()> {
    println!("{}", run.response_text);

    if let Some(report) = &run.package.test_report {
        let header = match run.package.state {
            PackageState::Ready => "Tests PASSED".green(),
            _ => "Tests did not pass".red(),
        };
        println!("{}", header);
        for line in &report.details {
            println!("  {}", line.dimmed());
        }
    }

    let mut labels: Vec<&str> = Vec::new();
    for action in &run.gate.actions {
        labels.push(match action {
            GateAction::Deploy => "Deploy to live system",
            GateAction::Implement => "Implement",
            GateAction::Review => "Review staged files",
        });
    }
    labels.push("Discard");

    let choice = Select::new()
        .with_prompt("  Staged package action")
        .items(&labels)
        .default(labels.len() - 1)
        .interact()?;

    match labels[choice] {
        "Deploy to live system" => match orchestrator.deploy(&run.package.id).await {
            Ok(record) => println!(
                "{}",
                format!("Deployed package {} ({:?}).", run.package.id, record.outcome).green()
            ),
            Err(e) => print_workflow_error(&e),
        },
        "Review staged files" => {
            println!("Staged files for package {}:", run.package.id);
            for path in run.package.source_files.keys() {
                println!("  {}", path);
            }
            println!(
                "{}",
                "Re-enter the request after review, or deploy via the generated script.".dimmed()
            );
        }
        _ => {
            orchestrator.discard(&run.package.id)?;
            println!("{}", "Package discarded; live files unchanged.".yellow());
        }
    }

    Ok(())
}

/// Present a plain-chat artifact with the simpler implement/review gate.
async fn handle_chat_outcome(
    orchestrator: &Orchestrator,
    outcome: ChatOutcome,
    permitted: bool,
) -> Result<()> {
    println!("{}", outcome.response_text);

    if !outcome.created_files.is_empty() {
        println!("Files created: {}", outcome.created_files.join(", "));
    }
    if let Some(report) = &outcome.test_report {
        println!("Test results: {:?}", report.status);
        for line in &report.details {
            println!("  {}", line.dimmed());
        }
    }

    if !permitted {
        if outcome
            .test_report
            .as_ref()
            .map(|r| !r.passed())
            .unwrap_or(false)
        {
            println!("{}", "Tests failed - implementation blocked for safety".red());
        }
        return Ok(());
    }

    let choice = Select::new()
        .with_prompt("  Artifact action")
        .items(&["Implement", "Review first", "Skip"])
        .default(2)
        .interact()?;

    match choice {
        0 => match orchestrator.implement(&outcome).await {
            Ok(result) => println!(
                "{}",
                format!("{}: {}", result.status, result.message).green()
            ),
            Err(e) => print_workflow_error(&e),
        },
        1 => {
            println!("Generated files:");
            for file in &outcome.created_files {
                println!("  {}", file);
            }
        }
        _ => {}
    }

    Ok(())
}

fn print_workflow_error(e: &WorkflowError) {
    if e.is_recoverable() {
        println!("{}", format!("{e}").yellow());
    } else {
        println!("{}", format!("{e}").red());
    }
}

// ---- Main -------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_or_create_config()?;
    init_tracing(&config.log_level);

    if cli.status {
        let db = open_database(&config)?;
        show_status(&config, &db)?;
        return Ok(());
    }

    if cli.audit {
        let db = open_database(&config)?;
        println!("{}", audit::generate_audit_report(&db));
        return Ok(());
    }

    if cli.rollback {
        let db = Arc::new(Mutex::new(open_database(&config)?));
        let orchestrator = build_orchestrator(&config, db);
        match orchestrator.rollback(None) {
            Ok(record) => println!(
                "Rolled back to backup {} at {}.",
                record.backup_id, record.timestamp
            ),
            Err(e) => {
                print_workflow_error(&e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    if cli.run {
        return run_loop(&config).await;
    }

    println!("Nothing to do. Try: custodian --run");
    Ok(())
}
