use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use simlevels::{run_batch, EngineConfig, OverrideSet, SimulationSource};

/// Compute decision levels for simulation authoring XML.
#[derive(Debug, Parser)]
#[command(name = "simlevels", version)]
struct Cli {
    /// Authoring XML files, one simulation each. The file stem is used as
    /// the simulation id.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON file of manual level corrections.
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Print the extracted node relation instead of level rows.
    #[arg(long)]
    nodes: bool,

    /// With --nodes, one row per (node, skill).
    #[arg(long)]
    split_by_score: bool,

    /// Pretty-print each JSON row.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    // Control verbosity with RUST_LOG:
    //   RUST_LOG=info   per-simulation summaries
    //   RUST_LOG=debug  + merge and override decisions
    //   RUST_LOG=trace  + per-node groupings
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let overrides = match &cli.overrides {
        Some(path) => OverrideSet::load(path)?,
        None => OverrideSet::new(),
    };
    let config = EngineConfig {
        split_by_score: cli.split_by_score,
    };

    let sources = cli
        .files
        .iter()
        .map(|path| read_source(path))
        .collect::<Result<Vec<_>>>()?;

    let report = run_batch(&sources, &config, &overrides);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for output in &report.outputs {
        if cli.nodes {
            for row in &output.nodes {
                write_row(&mut out, row, cli.pretty)?;
            }
        } else {
            for row in &output.rows {
                write_row(&mut out, row, cli.pretty)?;
            }
        }
    }
    out.flush()?;

    if !report.failures.is_empty() {
        anyhow::bail!(
            "{} of {} simulations failed to parse",
            report.failures.len(),
            sources.len()
        );
    }
    Ok(())
}

/// Reads one XML file, honouring a byte-order mark and defaulting to UTF-8.
fn read_source(path: &Path) -> Result<SimulationSource> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (text, encoding, had_errors) = encoding_rs::UTF_8.decode(&bytes);
    if had_errors {
        warn!(
            "{} is not valid {}; invalid sequences were replaced",
            path.display(),
            encoding.name()
        );
    }

    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context(format!("cannot derive a simulation id from {}", path.display()))?;
    info!("Loaded simulation {id} from {}", path.display());

    Ok(SimulationSource::new(id, text.into_owned()))
}

fn write_row(out: &mut impl Write, row: &impl Serialize, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(row)?
    } else {
        serde_json::to_string(row)?
    };
    writeln!(out, "{json}")?;
    Ok(())
}
