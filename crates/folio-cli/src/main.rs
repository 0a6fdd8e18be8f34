//! Folio inspector binary.
//!
//! Offline tools over snapshot, action and layout JSON files.
//!
//! Usage:
//!   folio tree doc.json --include-root
//!   folio check doc.json
//!   folio apply doc.json actions.json
//!   folio hit layout.json --x 10 --y 40 --width 200 --height 80
//!
//! Logs go to stderr at `info`; set `RUST_LOG=debug` for per-action detail.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing_subscriber::{EnvFilter, fmt};

use folio_client::ClientConfig;
use folio_crdt::{BlockTree, to_tree};
use folio_index::{Rect, RegionGrid};
use folio_types::{Action, BlockId, DocumentSnapshot};

/// Inspect Folio document snapshots.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Inspect Folio document snapshots, action batches and layouts")]
struct Args {
    /// Client config file (RON); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the editable element tree of a snapshot
    Tree {
        snapshot: PathBuf,
        /// Wrap the root block itself instead of listing its children
        #[arg(long)]
        include_root: bool,
    },
    /// Validate a snapshot's structure
    Check { snapshot: PathBuf },
    /// Apply an action batch and print the report and resulting snapshot
    Apply { snapshot: PathBuf, actions: PathBuf },
    /// List blocks of a layout file intersecting a rectangle
    Hit {
        layout: PathBuf,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
        #[arg(long, default_value_t = 0.0)]
        width: f64,
        #[arg(long, default_value_t = 0.0)]
        height: f64,
    },
}

/// One entry of a layout file: `{"id": "...", "rect": {"x":..,"y":..,"width":..,"height":..}}`.
#[derive(Debug, Deserialize)]
struct LayoutEntry {
    id: BlockId,
    rect: Rect,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(env_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    let output = run(&args.command, &config)?;
    println!("{output}");
    Ok(())
}

/// `RUST_LOG` when it parses, `info` otherwise.
fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn run(command: &Command, config: &ClientConfig) -> Result<String> {
    match command {
        Command::Tree {
            snapshot,
            include_root,
        } => {
            let snapshot: DocumentSnapshot = read_json(snapshot)?;
            let tree = BlockTree::from_snapshot(snapshot, config.tree.clone())?;
            Ok(serde_json::to_string_pretty(&to_tree(tree.snapshot(), *include_root))?)
        }
        Command::Check { snapshot } => check(&read_json(snapshot)?, config),
        Command::Apply { snapshot, actions } => {
            let mut tree = BlockTree::from_snapshot(read_json(snapshot)?, config.tree.clone())?;
            let actions: Vec<Action> = read_json(actions)?;
            let report = tree.apply(&actions);
            tracing::info!(?report, pending = tree.pending_count(), "Applied batch");
            Ok(serde_json::to_string_pretty(&serde_json::json!({
                "report": report,
                "pending": tree.pending_count(),
                "snapshot": tree.snapshot(),
            }))?)
        }
        Command::Hit {
            layout,
            x,
            y,
            width,
            height,
        } => {
            let entries: Vec<LayoutEntry> = read_json(layout)?;
            let query = Rect::new(*x, *y, *width, *height);
            if !query.is_valid() {
                bail!("query rectangle must be finite with non-negative size");
            }
            let mut grid = RegionGrid::new(config.region_cell_size);
            grid.sync_layout(0, entries.into_iter().map(|e| (e.id, e.rect)));
            let mut hits = grid.get_intersecting_blocks(&query);
            hits.sort();
            Ok(serde_json::to_string_pretty(&hits)?)
        }
    }
}

fn check(snapshot: &DocumentSnapshot, config: &ClientConfig) -> Result<String> {
    let tree = BlockTree::from_snapshot(snapshot.clone(), config.tree.clone())
        .context("snapshot failed validation")?;
    let root = tree.root_id();
    let depth = tree
        .descendants(root)
        .iter()
        .filter_map(|id| tree.depth(id))
        .max()
        .unwrap_or(0);
    Ok(format!(
        "ok: {} blocks, {} texts, max depth {}",
        tree.block_count(),
        tree.snapshot().deltas_by_text_id.len(),
        depth
    ))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
