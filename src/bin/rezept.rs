use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rezept::config::load_config;
use rezept::error::EngineError;
use rezept::ledger::LedgerClient;
use rezept::ledger::memory::InMemoryLedger;
use rezept::ledger::rpc::RpcLedgerClient;
use rezept::recipe::{Recipe, RecipeNode};
use rezept::runtime::engine::Engine;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine configuration YAML
    #[arg(long, short, default_value = "rezept.yaml")]
    config: PathBuf,

    /// Use the deterministic in-memory ledger instead of the RPC endpoint
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a recipe file and run it to completion
    Run {
        /// Path to the recipe YAML file
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Show the persisted batch record for a recipe
    Status {
        #[arg(long)]
        id: String,
    },

    /// Operator repair surface over partially applied batches
    Recover {
        #[command(subcommand)]
        action: RecoverAction,
    },
}

#[derive(Subcommand)]
enum RecoverAction {
    /// List every partially applied batch record
    List,

    /// Re-run the un-applied suffix of a partially applied batch
    Resume {
        #[arg(long)]
        id: String,
    },

    /// Execute operator-supplied remediation nodes from a YAML file
    Compensate {
        #[arg(long)]
        id: String,

        /// YAML list of remediation nodes
        #[arg(long, short)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let ledger: Arc<dyn LedgerClient> = if cli.offline {
        info!("Running against the in-memory ledger");
        Arc::new(InMemoryLedger::new())
    } else {
        info!(endpoint = %config.endpoint, network = %config.network, "Connecting ledger client");
        Arc::new(RpcLedgerClient::new(&config.endpoint))
    };
    let engine = Engine::from_config(&config, ledger)?;

    match cli.command {
        Commands::Run { file } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read recipe file from {}", file.display()))?;
            let recipe: Recipe = serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to deserialize recipe from {}", file.display()))?;
            let recipe_id = recipe.recipe_id.clone();

            match engine.submit_recipe(recipe).await {
                Ok(outcome) => {
                    info!(recipe_id = %recipe_id, "batch applied");
                    for (node_id, outputs) in &outcome.outputs {
                        for output in outputs {
                            println!("{node_id}: {} {}", output.amount, output.asset);
                        }
                    }
                }
                Err(EngineError::BatchHalted { record, cause }) => {
                    error!(recipe_id = %recipe_id, error = %cause, "batch halted");
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Status { id } => {
            let record = engine.batch_status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Recover { action } => {
            let recovery = engine.recovery();
            match action {
                RecoverAction::List => {
                    for record in recovery.list_partially_applied().await? {
                        println!(
                            "{}\t{} of {} node(s) applied\t{}",
                            record.recipe_id,
                            record.applied_node_ids.len(),
                            record.recipe.nodes.len(),
                            record.halted_reason.as_deref().unwrap_or("-"),
                        );
                    }
                }
                RecoverAction::Resume { id } => {
                    let outcome = recovery.resume(&id).await?;
                    info!(recipe_id = %id, status = ?outcome.record.status, "resume finished");
                    println!("{}", serde_json::to_string_pretty(&outcome.record)?);
                }
                RecoverAction::Compensate { id, file } => {
                    let raw = fs::read_to_string(&file).with_context(|| {
                        format!("Failed to read remediation file from {}", file.display())
                    })?;
                    let nodes: Vec<RecipeNode> = serde_yaml::from_str(&raw).with_context(|| {
                        format!("Failed to deserialize remediation nodes from {}", file.display())
                    })?;
                    let record = recovery.compensate(&id, nodes).await?;
                    info!(recipe_id = %id, "batch recovered");
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
            }
        }
    }

    Ok(())
}
