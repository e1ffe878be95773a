//! Tenant Grapher CLI
//!
//! Command-line interface for:
//! - Processing a JSON file of resource records into a snapshot-backed graph
//! - Inspecting, creating, and deleting tenant abstraction seeds
//! - Checking that the Original and Abstracted graphs line up

use anyhow::{anyhow, bail, Context, Result};
use atg_processing::{
    AtgConfig, ProcessingStats, ProgressSnapshot, ResourceProcessor, ResourceRecord,
    TenantSeedManager,
};
use atg_storage::{GraphSession, MemoryGraphStore};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atg")]
#[command(author, version, about = "Tenant Grapher: cloud resource graph processing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct StoreArgs {
    /// Graph snapshot file (created if missing)
    #[arg(long, env = "ATG_DB", default_value = "atg-graph.json")]
    db: PathBuf,
    /// JSON config file (`store` and `processing` sections)
    #[arg(long, env = "ATG_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process resource records into the graph.
    ///
    /// Input is a JSON array of records, or an object with a `resources` array.
    Process {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,
        /// Tenant the records belong to
        #[arg(long, env = "ATG_TENANT_ID")]
        tenant_id: String,
        #[command(flatten)]
        store: StoreArgs,
        /// Concurrent workers
        #[arg(long)]
        max_workers: Option<usize>,
        /// Attempts per resource before it is poisoned
        #[arg(long)]
        max_retries: Option<u32>,
        /// Only process the first N records
        #[arg(long)]
        limit: Option<usize>,
        /// Print the final stats as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Tenant abstraction seed management
    Seed {
        #[command(subcommand)]
        command: SeedCommands,
    },

    /// Compare edge counts between the Original and Abstracted graphs
    Consistency {
        #[arg(long, env = "ATG_TENANT_ID")]
        tenant_id: String,
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Subcommand)]
enum SeedCommands {
    /// Print whether the tenant has a seed (never prints the seed itself)
    Show {
        #[arg(long, env = "ATG_TENANT_ID")]
        tenant_id: String,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Create the tenant's seed if it does not exist yet
    Create {
        #[arg(long, env = "ATG_TENANT_ID")]
        tenant_id: String,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Delete the tenant's seed. Existing abstracted IDs stop matching.
    Delete {
        #[arg(long, env = "ATG_TENANT_ID")]
        tenant_id: String,
        #[command(flatten)]
        store: StoreArgs,
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Process {
            input,
            tenant_id,
            store,
            max_workers,
            max_retries,
            limit,
            json,
        } => {
            let overrides = Overrides {
                max_workers,
                max_retries,
                limit,
            };
            cmd_process(&input, &tenant_id, &store, overrides, json).await?;
        }
        Commands::Seed { command } => match command {
            SeedCommands::Show { tenant_id, store } => cmd_seed_show(&tenant_id, &store).await?,
            SeedCommands::Create { tenant_id, store } => {
                cmd_seed_create(&tenant_id, &store).await?
            }
            SeedCommands::Delete {
                tenant_id,
                store,
                yes,
            } => cmd_seed_delete(&tenant_id, &store, yes).await?,
        },
        Commands::Consistency { tenant_id, store } => {
            cmd_consistency(&tenant_id, &store).await?;
        }
    }
    Ok(())
}

// ============================================================================
// Store plumbing
// ============================================================================

struct Overrides {
    max_workers: Option<usize>,
    max_retries: Option<u32>,
    limit: Option<usize>,
}

fn load_config(args: &StoreArgs) -> Result<AtgConfig> {
    match &args.config {
        Some(path) => Ok(AtgConfig::from_file(path)?),
        None => Ok(AtgConfig::default()),
    }
}

/// Snapshot-backed store plus a session over it
struct OpenStore {
    memory: Arc<MemoryGraphStore>,
    session: GraphSession,
    path: PathBuf,
}

impl OpenStore {
    async fn open(args: &StoreArgs, config: &AtgConfig) -> Result<Self> {
        let memory = Arc::new(
            MemoryGraphStore::open(&args.db)
                .with_context(|| format!("failed to load graph snapshot {}", args.db.display()))?,
        );
        let session = GraphSession::open(memory.clone(), config.store.clone()).await?;
        Ok(Self {
            memory,
            session,
            path: args.db.clone(),
        })
    }

    fn save(&self) -> Result<()> {
        self.session.close();
        self.memory
            .save_snapshot(&self.path)
            .with_context(|| format!("failed to write graph snapshot {}", self.path.display()))?;
        eprintln!(
            "{} {} (nodes={} edges={})",
            "wrote".green().bold(),
            self.path.display().to_string().bold(),
            self.memory.node_count(),
            self.memory.edge_count()
        );
        Ok(())
    }
}

fn read_records(input: &Path) -> Result<Vec<ResourceRecord>> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", input.display()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("resources") {
            Some(Value::Array(items)) => items,
            _ => bail!("expected a `resources` array in {}", input.display()),
        },
        _ => bail!("expected a JSON array of resources in {}", input.display()),
    };

    let total = items.len();
    let records: Vec<ResourceRecord> = items
        .into_iter()
        .filter_map(ResourceRecord::from_value)
        .collect();
    if records.len() < total {
        tracing::warn!(
            dropped = total - records.len(),
            "ignoring input entries that are not JSON objects"
        );
    }
    Ok(records)
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_process(
    input: &Path,
    tenant_id: &str,
    store_args: &StoreArgs,
    overrides: Overrides,
    json: bool,
) -> Result<()> {
    let mut config = load_config(store_args)?;
    if let Some(retries) = overrides.max_retries {
        config.processing.max_retries = retries;
    }
    if let Some(limit) = overrides.limit {
        config.processing.resource_limit = Some(limit);
    }
    let max_workers = overrides.max_workers.unwrap_or(config.processing.max_workers);
    let progress_every = config.processing.progress_every;

    let records = read_records(input)?;
    eprintln!(
        "{} {} records from {}",
        "loaded".green().bold(),
        records.len(),
        input.display()
    );

    let store = OpenStore::open(store_args, &config).await?;
    let processor = ResourceProcessor::new(store.session.clone(), tenant_id, config.processing)
        .await
        .context("failed to initialize resource processor")?;

    let report = |p: &ProgressSnapshot| {
        let due = progress_every > 0 && p.processed % progress_every == 0;
        if due || p.processed == p.total {
            eprintln!(
                "{} {}/{} ({:.1}%) ok={} skipped={} failed={} retrying={}",
                "progress".cyan(),
                p.processed,
                p.total,
                p.percentage(),
                p.successful,
                p.skipped,
                p.failed,
                p.retrying
            );
        }
    };

    let stats = processor
        .process_resources(records, max_workers, Some(&report), progress_every)
        .await?;

    store.save()?;
    print_stats(&stats);
    if json {
        println!("{}", serde_json::to_string_pretty(&stats.to_dict())?);
    }
    if !stats.poisoned.is_empty() {
        bail!("{} resources could not be processed", stats.poisoned.len());
    }
    Ok(())
}

fn print_stats(stats: &ProcessingStats) {
    let rate = format!("{:.1}%", stats.success_rate());
    let rate = if stats.failed == 0 {
        rate.green().bold()
    } else {
        rate.yellow().bold()
    };
    eprintln!("{}", stats.to_string().trim_end());
    eprintln!("{} success rate {}", "done".green().bold(), rate);
    for id in &stats.poisoned {
        eprintln!("  {} {}", "poisoned".red(), id);
    }
}

async fn cmd_seed_show(tenant_id: &str, store_args: &StoreArgs) -> Result<()> {
    let config = load_config(store_args)?;
    let store = OpenStore::open(store_args, &config).await?;
    let seeds = TenantSeedManager::new(store.session.clone());

    match seeds.get_seed(tenant_id).await? {
        Some(seed) => println!(
            "{} tenant {} has a seed ({} chars)",
            "ok".green().bold(),
            tenant_id.bold(),
            seed.len()
        ),
        None => println!("{} tenant {} has no seed", "missing".yellow().bold(), tenant_id.bold()),
    }
    Ok(())
}

async fn cmd_seed_create(tenant_id: &str, store_args: &StoreArgs) -> Result<()> {
    let config = load_config(store_args)?;
    let store = OpenStore::open(store_args, &config).await?;
    let seeds = TenantSeedManager::new(store.session.clone());

    let existed = seeds.get_seed(tenant_id).await?.is_some();
    seeds.get_or_create_seed(tenant_id).await?;
    if existed {
        eprintln!("{} tenant {} already has a seed", "ok".green().bold(), tenant_id.bold());
    } else {
        eprintln!("{} created seed for tenant {}", "ok".green().bold(), tenant_id.bold());
    }
    store.save()
}

async fn cmd_seed_delete(tenant_id: &str, store_args: &StoreArgs, yes: bool) -> Result<()> {
    if !yes {
        return Err(anyhow!(
            "deleting a seed orphans every abstracted ID for {tenant_id}; pass --yes to confirm"
        ));
    }
    let config = load_config(store_args)?;
    let store = OpenStore::open(store_args, &config).await?;
    let seeds = TenantSeedManager::new(store.session.clone());

    if seeds.delete_seed(tenant_id).await? {
        eprintln!("{} deleted seed for tenant {}", "ok".green().bold(), tenant_id.bold());
        store.save()
    } else {
        eprintln!("{} tenant {} not found", "missing".yellow().bold(), tenant_id.bold());
        Ok(())
    }
}

async fn cmd_consistency(tenant_id: &str, store_args: &StoreArgs) -> Result<()> {
    let config = load_config(store_args)?;
    let store = OpenStore::open(store_args, &config).await?;
    // read-only, so a missing seed is an error rather than minted
    if TenantSeedManager::new(store.session.clone())
        .get_seed(tenant_id)
        .await?
        .is_none()
    {
        bail!("tenant {tenant_id} has no seed; run `atg process` or `atg seed create` first");
    }
    let processor =
        ResourceProcessor::new(store.session.clone(), tenant_id, config.processing).await?;

    let comparisons = processor.check_dual_graph_consistency().await?;
    if comparisons.is_empty() {
        println!("no relationships between resources yet");
        return Ok(());
    }

    let mut mismatches = 0;
    for c in &comparisons {
        let status = if c.matches() {
            "MATCH".green().bold()
        } else {
            mismatches += 1;
            "MISMATCH".red().bold()
        };
        println!(
            "{:<8} {:<20} original={} abstracted={}",
            status, c.rel_type, c.original, c.abstracted
        );
    }
    if mismatches > 0 {
        bail!("{mismatches} relationship types differ between graphs");
    }
    Ok(())
}
