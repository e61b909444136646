//! # Toolscan CLI (`toolscan`)
//!
//! The `toolscan` binary drives the compliance scanner: database
//! initialization, one-shot scans from the command line, report export,
//! knowledge base management, and the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! toolscan --config ./config/toolscan.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `toolscan init` | Create the SQLite database and run schema migrations |
//! | `toolscan scan <names>...` | Scan tools by name and wait for the results |
//! | `toolscan report <id>` | Print a report document (`--export` writes it to disk) |
//! | `toolscan kb list` | List knowledge base entries |
//! | `toolscan kb show <name>` | Show one knowledge base entry |
//! | `toolscan kb delete <name>` | Delete a knowledge base entry |
//! | `toolscan serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use toolscan::report::ReportService;
use toolscan::scan::{task::ScanStatus, ScanOrchestrator};
use toolscan::{config, db, knowledge, migrate, server, store};

/// AI-assisted compliance scanning for developer tools.
#[derive(Parser)]
#[command(
    name = "toolscan",
    about = "Toolscan — AI-assisted compliance scanning for developer tools",
    version,
    long_about = "Toolscan analyzes the Terms of Service of third-party developer tools, \
    merges the findings with a curated knowledge base, scores each tool across security, \
    license, maintenance, performance, and TOS dimensions, and produces one compliance \
    report per tool. Reports are served over a JSON HTTP API and exportable as files."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/toolscan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (tools,
    /// compliance_reports, knowledge_base). Idempotent.
    Init,

    /// Scan tools by name and wait for every task to finish.
    ///
    /// Unknown tools are created first, so `toolscan scan "Docker Desktop"`
    /// works without a prior create step.
    Scan {
        /// Tool names to scan.
        #[arg(required = true)]
        tools: Vec<String>,
    },

    /// Print a compliance report document as JSON.
    Report {
        /// Report id.
        id: i64,

        /// Also write the document to the configured report directory.
        #[arg(long)]
        export: bool,
    },

    /// Manage the knowledge base.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Knowledge base subcommands.
#[derive(Subcommand)]
enum KbAction {
    /// List all stored knowledge entries.
    List,
    /// Show one entry as JSON.
    Show {
        /// Tool name (case-insensitive).
        name: String,
    },
    /// Delete an entry.
    Delete {
        /// Tool name (case-insensitive).
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output (report JSON) stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scan { tools } => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;

            let mut tool_ids = Vec::with_capacity(tools.len());
            for name in &tools {
                let tool = store::find_or_create_tool(&pool, name.trim(), None, "cli").await?;
                tool_ids.push(tool.id);
            }

            let orchestrator = Arc::new(ScanOrchestrator::new(pool.clone(), &cfg)?);
            let batch = orchestrator.create_batch(&tool_ids).await?;
            println!("Scanning {} tools...", batch.accepted.len());
            let tasks = orchestrator.run_batch(batch).await?;

            for task in tasks {
                match task.status {
                    ScanStatus::Completed => {
                        let report_id = task
                            .result
                            .as_ref()
                            .and_then(|r| r.get("report_id"))
                            .and_then(|v| v.as_i64());
                        match report_id {
                            Some(id) => println!("  {} — completed (report {})", task.tool_name, id),
                            None => println!("  {} — completed", task.tool_name),
                        }
                    }
                    ScanStatus::Failed => {
                        let reason = task.error_message.as_deref().unwrap_or("unknown error");
                        println!("  {} — FAILED: {}", task.tool_name, reason);
                    }
                    other => println!("  {} — {:?}", task.tool_name, other),
                }
            }
        }
        Commands::Report { id, export } => {
            let pool = db::connect(&cfg).await?;
            let report = store::find_report_by_id(&pool, id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("report {} does not exist", id))?;
            let tool = store::find_tool_by_id(&pool, report.tool_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("tool {} does not exist", report.tool_id))?;

            let service = ReportService::new(&cfg.reporting.output_path);
            let document = service.generate_json_report(&pool, &tool, &report).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);

            if export {
                let path = service.save_json_report(&pool, &tool, &report).await?;
                eprintln!("Report written to {}", path.display());
            }
        }
        Commands::Kb { action } => {
            let pool = db::connect(&cfg).await?;
            match action {
                KbAction::List => {
                    let entries = knowledge::list_entries(&pool).await?;
                    if entries.is_empty() {
                        println!("Knowledge base is empty.");
                    }
                    for entry in entries {
                        let license = entry
                            .analysis
                            .license_type
                            .as_deref()
                            .unwrap_or("unknown")
                            .to_string();
                        println!("  {} — {} (source: {})", entry.tool_name, license, entry.source);
                    }
                }
                KbAction::Show { name } => {
                    let entry = knowledge::get_entry(&pool, &name)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("no knowledge entry for {}", name))?;
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                }
                KbAction::Delete { name } => {
                    if knowledge::delete_entry(&pool, &name).await? {
                        println!("Deleted knowledge entry for {}.", name);
                    } else {
                        anyhow::bail!("no knowledge entry for {}", name);
                    }
                }
            }
        }
        Commands::Serve => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            server::run_server(&cfg, pool).await?;
        }
    }

    Ok(())
}
