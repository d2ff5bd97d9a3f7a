use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use sightline_core::{Embedding, MatchResult};
use sightline_scan::{load_manifest, BatchScanner, Config, ImageOutcome};
use sightline_store::{export_document, import_document, ExportDocument, ProfileStore, SqliteStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "sightline", about = "Match detected faces against enrolled identities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty identity profile
    Add {
        name: String,
    },
    /// Append an embedding sample to a profile
    Enroll {
        id: String,
        /// JSON array / embedding object, or a path to a file holding one
        #[arg(short, long)]
        embedding: String,
    },
    /// List profiles
    List,
    /// Show one profile
    Show {
        id: String,
    },
    /// Rename a profile
    Rename {
        id: String,
        name: String,
    },
    /// Remove one sample by index
    RemoveSample {
        id: String,
        index: usize,
    },
    /// Remove all samples from a profile
    Reset {
        id: String,
    },
    /// Delete a profile
    Delete {
        id: String,
    },
    /// Delete every profile
    Clear,
    /// Include a profile in scans
    Select {
        id: String,
    },
    /// Exclude a profile from scans
    Deselect {
        id: String,
    },
    /// Include every profile in scans
    SelectAll,
    /// Exclude every profile from scans
    SelectNone,
    /// Write all profiles and the selection to a JSON file
    Export {
        file: PathBuf,
    },
    /// Merge profiles from a JSON export
    Import {
        file: PathBuf,
    },
    /// Scan images listed in a detector manifest
    Scan {
        manifest: PathBuf,
        /// One JSON object per image instead of text
        #[arg(long)]
        json: bool,
        /// Matches shown per image
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// Print the effective engine configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let mut store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening profile store {}", config.db_path.display()))?;

    match cli.command {
        Commands::Add { name } => {
            let profile = store.create_profile(&name)?;
            println!("{}", profile.id);
        }
        Commands::Enroll { id, embedding } => {
            let sample = read_embedding(&embedding)?;
            let dims = sample.len();
            let count = store.add_sample(&id, sample)?;
            println!("Enrolled {dims}-d sample into {id} ({count} total)");
        }
        Commands::List => {
            let rows = store.summaries()?;
            if rows.is_empty() {
                println!("No profiles enrolled");
            }
            for row in rows {
                let mark = if row.active { "*" } else { " " };
                println!(
                    "{mark} {}  {:<24} {:>3} samples  {}",
                    row.id,
                    row.name,
                    row.samples,
                    row.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Commands::Show { id } => {
            let profile = store
                .get(&id)?
                .with_context(|| format!("profile not found: {id}"))?;
            let active = store.selection()?.is_active(&id);
            println!("id:      {}", profile.id);
            println!("name:    {}", profile.name);
            println!("active:  {active}");
            println!("samples: {}", profile.samples.len());
            for (i, sample) in profile.samples.iter().enumerate() {
                let model = sample.model_version.as_deref().unwrap_or("-");
                println!("  [{i}] {} dims, model {model}", sample.len());
            }
        }
        Commands::Rename { id, name } => {
            store.rename_profile(&id, &name)?;
        }
        Commands::RemoveSample { id, index } => {
            store.remove_sample(&id, index)?;
        }
        Commands::Reset { id } => {
            store.clear_samples(&id)?;
        }
        Commands::Delete { id } => {
            store.delete_profile(&id)?;
        }
        Commands::Clear => {
            store.clear_all()?;
        }
        Commands::Select { id } => {
            store.set_selected(&id, true)?;
        }
        Commands::Deselect { id } => {
            store.set_selected(&id, false)?;
        }
        Commands::SelectAll => {
            store.select_all(true)?;
        }
        Commands::SelectNone => {
            store.select_all(false)?;
        }
        Commands::Export { file } => {
            let doc = export_document(&store)?;
            std::fs::write(&file, doc.to_json()?)
                .with_context(|| format!("writing {}", file.display()))?;
            println!("Exported {} profiles to {}", doc.profiles.len(), file.display());
        }
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let count = import_document(&mut store, ExportDocument::from_json(&raw)?)?;
            println!("Imported {count} profiles");
        }
        Commands::Scan { manifest, json, top } => {
            scan(&config, &store, &manifest, json, top).await?;
        }
        Commands::Config => {
            let engine = config.engine()?;
            println!("# db_path = {}", config.db_path.display());
            println!("# concurrency = {}", config.concurrency);
            print!("{}", engine.to_toml_string()?);
        }
    }

    Ok(())
}

async fn scan(config: &Config, store: &SqliteStore, manifest: &Path, json: bool, top: usize) -> Result<()> {
    let (detector, images) =
        load_manifest(manifest).with_context(|| format!("loading manifest {}", manifest.display()))?;
    let scanner = BatchScanner::from_config(Arc::new(detector), config.engine()?, config.concurrency)?;

    // Profiles are read once; edits made while the scan runs apply to the next one.
    let snapshot = store.snapshot()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing in-flight images");
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<ImageOutcome>(config.concurrency * 2);
    let print = async move {
        while let Some(outcome) = rx.recv().await {
            if json {
                println!("{}", outcome_json(&outcome, top));
            } else {
                print_outcome(&outcome, top);
            }
        }
    };

    let (summary, ()) = tokio::join!(
        scanner.scan(&snapshot.profiles, &snapshot.selection, images, cancel, tx),
        print
    );
    let summary = summary?;

    if json {
        println!("{}", serde_json::json!({ "summary": summary }));
    } else {
        println!(
            "\n{} scanned: {} flagged, {} possible, {} clear, {} failed",
            summary.scanned, summary.flagged, summary.possible, summary.clear, summary.failed
        );
        if summary.cancelled {
            println!("Cancelled, {} images not scanned", summary.skipped);
        }
    }
    Ok(())
}

fn print_outcome(outcome: &ImageOutcome, top: usize) {
    match &outcome.result {
        Ok(report) => {
            let verdict = &report.verdict;
            println!(
                "{:<9} {}  ({} faces)",
                verdict.tier.as_str().to_uppercase(),
                outcome.image.id,
                verdict.face_count
            );
            if let Some(err) = &report.detector_error {
                println!("          detector failed: {err}");
            }
            for m in report.top(top) {
                println!("          {}", describe_match(m));
            }
        }
        Err(err) => println!("{:<9} {}  {err}", "ERROR", outcome.image.id),
    }
}

fn describe_match(m: &MatchResult) -> String {
    format!(
        "{} [{}]  distance {:.3}  confidence {}%",
        m.name, m.identity_id, m.distance, m.confidence
    )
}

fn outcome_json(outcome: &ImageOutcome, top: usize) -> serde_json::Value {
    match &outcome.result {
        Ok(report) => serde_json::json!({
            "index": outcome.index,
            "image": outcome.image.id,
            "tier": report.verdict.tier,
            "face_count": report.verdict.face_count,
            "matches": report.top(top),
            "faces": report.faces,
            "detector_error": report.detector_error,
        }),
        Err(err) => serde_json::json!({
            "index": outcome.index,
            "image": outcome.image.id,
            "error": err.to_string(),
        }),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingInput {
    Values(Vec<f32>),
    Full(Embedding),
}

/// Parse `arg` as inline JSON, or as a path to a JSON file.
fn read_embedding(arg: &str) -> Result<Embedding> {
    let trimmed = arg.trim_start();
    let raw = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("reading embedding file {arg}"))?
    };
    parse_embedding(&raw)
}

fn parse_embedding(raw: &str) -> Result<Embedding> {
    let embedding = match serde_json::from_str::<EmbeddingInput>(raw).context("embedding must be a JSON number array")? {
        EmbeddingInput::Values(values) => Embedding::new(values),
        EmbeddingInput::Full(embedding) => embedding,
    };
    anyhow::ensure!(!embedding.is_empty(), "embedding is empty");
    Ok(embedding)
}
