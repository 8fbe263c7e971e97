//! CLI entry point for the similarity search engine.
//!
//! Loads the reference set from the configured JSON dump and exposes the
//! search, metadata and evaluation operations as subcommands.

use anyhow::{Context, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use dermasim::{
    AnalysisMatch, EvalQuery, Evaluator, ItemId, MemoryRecordStore, SearchError, Settings,
    SimilarityService,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Embedding-indexed similarity search
#[derive(Parser)]
#[command(
    name = "dermasim",
    version = env!("CARGO_PKG_VERSION"),
    about = "Find the reference items most similar to a query embedding",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of settings
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .dermasim directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .dermasim/settings.toml")]
    Config,

    /// Build the index and report its state
    #[command(about = "Load the reference set and show index statistics")]
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Nearest neighbors of a query embedding
    #[command(
        about = "Find reference items similar to an embedding",
        after_help = "The embedding file holds either a JSON array of numbers or an object\nwith an \"embedding\" array.\n\nExamples:\n  dermasim query lesion.json\n  dermasim query lesion.json -k 5 --json\n  dermasim query lesion.json --exclude ISIC_0024306"
    )]
    Query {
        /// JSON file with the query embedding
        embedding: PathBuf,

        /// Number of matches (defaults to search.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Item id to leave out of the results
        #[arg(long)]
        exclude: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Metadata lookup by item id
    #[command(about = "Show stored metadata and display URLs for item ids")]
    Metadata {
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Leave-one-out retrieval evaluation
    #[command(
        about = "Measure how often neighbors share the query's diagnosis",
        after_help = "The queries file is a JSON array of {\"image_id\": ..., \"embedding\": [...]}."
    )]
    Evaluate {
        /// JSON file with the evaluation queries
        queries: PathBuf,

        /// Neighbors per query (defaults to search.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Also write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Bare(Vec<f32>),
    Wrapped { embedding: Vec<f32> },
}

impl EmbeddingFile {
    fn into_vec(self) -> Vec<f32> {
        match self {
            Self::Bare(v) | Self::Wrapped { embedding: v } => v,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        if let Some(search) = e.downcast_ref::<SearchError>() {
            for suggestion in search.recovery_suggestions() {
                eprintln!("  - {suggestion}");
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init { force } = cli.command {
        let dir = std::env::current_dir().context("cannot determine current directory")?;
        let path = Settings::init_config_file(&dir, force)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("failed to create configuration")?;
        println!("Created configuration file at: {}", path.display());
        return Ok(());
    }

    if cli.config.is_none()
        && let Err(warning) = Settings::check_init()
    {
        eprintln!("Warning: {warning}");
        eprintln!("Using default configuration for now.");
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("configuration error loading from {}", path.display()))?,
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        }),
    };

    init_tracing(&settings, cli.verbose);

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Stats { json } => {
            let service = open_service(&settings);
            let start = Instant::now();
            let ready = service.ensure_loaded();
            let stats = service.lifecycle().stats();
            if !ready {
                tracing::warn!("Reference set could not be loaded");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("State:          {:?}", stats.state);
                println!("Items:          {}", stats.items);
                match stats.dimension {
                    Some(d) => println!("Dimension:      {d}"),
                    None => println!("Dimension:      -"),
                }
                println!("Generation:     {}", stats.generation);
                println!("Build attempts: {}", stats.build_attempts);
                println!("Load time:      {:.2?}", start.elapsed());
                if let Some(err) = &stats.last_error {
                    println!("Last error:     {err}");
                }
            }
        }

        Commands::Query {
            embedding,
            k,
            exclude,
            json,
        } => {
            let service = open_service(&settings);
            let file: EmbeddingFile = read_json(&embedding)?;
            let vector = file.into_vec();
            let k = k.unwrap_or_else(|| service.default_k());

            let matches = match &exclude {
                Some(id) => service.find_similar_excluding(&vector, k, &ItemId::new(id.as_str()))?,
                None => service.find_similar(&vector, k)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else {
                print_matches(&matches);
            }
        }

        Commands::Metadata { ids, json } => {
            let service = open_service(&settings);
            let ids: Vec<ItemId> = ids.into_iter().map(ItemId::from).collect();
            let resolved = service.resolve_metadata(&ids)?;

            // Input order, skipping ids with no record
            let ordered: Vec<_> = ids.iter().filter_map(|id| resolved.get(id)).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&ordered)?);
            } else {
                for id in &ids {
                    match resolved.get(id) {
                        Some(record) => {
                            println!("{id}");
                            println!("  diagnosis:    {}", or_dash(record.diagnosis.as_deref()));
                            println!(
                                "  age:          {}",
                                record.age.map_or_else(|| "-".to_string(), |a| a.to_string())
                            );
                            println!("  sex:          {}", or_dash(record.sex.as_deref()));
                            println!("  localization: {}", or_dash(record.localization.as_deref()));
                            println!("  url:          {}", record.display_url);
                        }
                        None => println!("{id}: not found"),
                    }
                }
            }
        }

        Commands::Evaluate {
            queries,
            k,
            output,
            json,
        } => {
            let service = open_service(&settings);
            let queries: Vec<EvalQuery> = read_json(&queries)?;
            if queries.is_empty() {
                bail!("no evaluation queries in input");
            }

            let mut evaluator = Evaluator::new(&service, settings.evaluation.clone());
            if let Some(k) = k {
                evaluator = evaluator.with_k(k);
            }
            let report = evaluator.evaluate(&queries)?;

            if let Some(path) = &output {
                let body = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, body)
                    .with_context(|| format!("failed to write report to {}", path.display()))?;
                eprintln!("Report written to {}", path.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
    }

    Ok(())
}

fn init_tracing(settings: &Settings, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        settings.logging.tracing_level()
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Service over the configured dump. An unreadable dump yields an offline
/// store so that searches degrade to zero matches.
fn open_service(settings: &Settings) -> SimilarityService {
    let path = settings.resolved_dump_path();
    let base_url = settings.storage.public_base_url.as_str();

    let store = MemoryRecordStore::from_json_file(&path, base_url).unwrap_or_else(|e| {
        tracing::warn!("Reference store unavailable: {e}");
        let store = MemoryRecordStore::new(base_url);
        store.set_online(false);
        store
    });

    SimilarityService::from_settings(Arc::new(store), settings)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn print_matches(matches: &[AnalysisMatch]) {
    if matches.is_empty() {
        println!("No similar items found.");
        return;
    }

    for (rank, m) in matches.iter().enumerate() {
        let age = m.age.map_or_else(|| "?".to_string(), |a| format!("{a:.0}"));
        println!(
            "{:>2}. {}  distance={:.4}  dx={}  age={}  sex={}  site={}",
            rank + 1,
            m.id,
            m.distance,
            m.diagnosis,
            age,
            m.sex,
            m.localization
        );
        if !m.image_url.is_empty() {
            println!("    {}", m.image_url);
        }
    }
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}
