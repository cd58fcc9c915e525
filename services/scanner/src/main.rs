//! Forecast model run collection scanner.
//!
//! Scans a directory of NetCDF run files into a persisted collection index
//! and answers questions about it: which runs and geometry groups exist,
//! what the time axis of a variable looks like, and where a view cell lives.

mod view_arg;

use aggregation::{
    Collection, CollectionConfig, LogicalIndex, NetcdfCodec, ScanMode, ScanReport, TieBreak,
    ViewKind,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "fmrc-scanner")]
#[command(about = "Aggregate forecast model run files into one virtual dataset")]
struct Args {
    /// Configuration file path (default: environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collection root, overriding the configuration
    #[arg(long)]
    root: Option<PathBuf>,

    /// Best view tie-break: prefer_fresh_run (newest run wins) or
    /// prefer_mature_forecast (oldest run, longest lead, wins)
    #[arg(long)]
    tie_break: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the collection root and persist the index
    Scan {
        /// Re-open every file, not only new or changed ones
        #[arg(long)]
        full: bool,

        /// Keep scanning every N seconds
        #[arg(long)]
        watch: Option<u64>,
    },
    /// Print geometry groups, runs and optionally a variable's time axis
    Show {
        #[arg(short, long)]
        variable: Option<String>,
    },
    /// Map a view index to a file position, optionally reading the data
    Resolve {
        #[arg(short, long)]
        variable: String,

        /// 2d, best, run:<time>, offset:<hours>, valid:<time>
        #[arg(long, default_value = "best", value_parser = view_arg::parse_view)]
        view: ViewKind,

        /// Element of a 1D view, or offset index of a 2D view
        #[arg(short, long)]
        index: usize,

        /// Run index (2D view only)
        #[arg(long)]
        run: Option<usize>,

        /// Decode the cell and print summary statistics
        #[arg(long)]
        read: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        collection = %config.collection_id,
        root = %config.root.display(),
        strict = config.strict_geometry,
        tie_break = %config.tie_break,
        "Loaded configuration"
    );

    let store = Arc::new(config.store.build()?);
    let collection = Collection::open(config, Arc::new(NetcdfCodec::new()), store).await?;

    match args.command {
        Command::Scan { full, watch } => {
            let mode = if full { ScanMode::Full } else { ScanMode::Incremental };
            let report = collection.scan_with(mode).await?;
            print_report(&report);

            if let Some(seconds) = watch {
                watch_collection(&collection, Duration::from_secs(seconds.max(1))).await;
            }
        }
        Command::Show { variable } => show(&collection, variable.as_deref())?,
        Command::Resolve {
            variable,
            view,
            index,
            run,
            read,
        } => {
            let logical = match run {
                Some(run) => LogicalIndex::Cell { run, offset: index },
                None => LogicalIndex::Series(index),
            };
            resolve(&collection, &variable, view, logical, read).await?;
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<CollectionConfig> {
    let mut config = match &args.config {
        Some(path) => CollectionConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CollectionConfig::from_env(),
    };

    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(tie_break) = &args.tie_break {
        config.tie_break = TieBreak::parse(tie_break)
            .with_context(|| format!("unknown tie-break '{}'", tie_break))?;
    }

    Ok(config)
}

/// Incremental scans until interrupted. Failed scans are logged and retried
/// on the next tick.
async fn watch_collection(collection: &Collection, period: Duration) {
    info!(period_secs = period.as_secs(), "Watching collection");
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match collection.scan().await {
                    Ok(report) if report.changed() => print_report(&report),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Scan failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                return;
            }
        }
    }
}

fn print_report(report: &ScanReport) {
    println!(
        "discovered {} scanned {} added {} updated {} removed {} unchanged {}",
        report.discovered,
        report.scanned,
        report.added.len(),
        report.updated.len(),
        report.removed.len(),
        report.unchanged
    );
    for grouped in &report.grouped {
        for mismatch in &grouped.mismatches {
            println!(
                "  grouped  {} {} {} ({})",
                grouped.run_time.format("%Y-%m-%dT%H:%MZ"),
                mismatch.variable,
                mismatch.geometry,
                mismatch.reason
            );
        }
    }
    for failure in &report.failures {
        println!("  failed   {}", failure);
    }
}

fn show(collection: &Collection, variable: Option<&str>) -> Result<()> {
    let snapshot = collection.snapshot();
    println!(
        "collection {}: {} runs, {} variables",
        collection.collection_id(),
        snapshot.len(),
        snapshot.variables().len()
    );

    for group in collection.groups() {
        let variables: Vec<&str> = group.variables.iter().map(String::as_str).collect();
        println!(
            "{} {} [{}] {} runs: {}",
            if group.primary { "*" } else { " " },
            group.id,
            group.geometry.describe(),
            group.run_times.len(),
            variables.join(",")
        );
    }

    for run in snapshot.runs() {
        let names: Vec<&str> = run.variable_names().collect();
        println!(
            "  {}  {}  {}",
            run.run_time().format("%Y-%m-%dT%H:%MZ"),
            run.path().display(),
            names.join(",")
        );
    }

    if let Some(variable) = variable {
        let view = collection.view(ViewKind::TwoD, variable)?;
        let axis = view.time_axis();
        println!("time axis of {} ({} x {})", variable, axis.n_runs(), axis.regular_len());
        for (run_time, row) in axis.run_axis().iter().zip(axis.rows()) {
            let offsets: Vec<String> = row.iter().map(ToString::to_string).collect();
            println!("  {}  [{}]", run_time.format("%Y-%m-%dT%H:%MZ"), offsets.join(" "));
        }
    }

    Ok(())
}

async fn resolve(
    collection: &Collection,
    variable: &str,
    kind: ViewKind,
    index: LogicalIndex,
    read: bool,
) -> Result<()> {
    let view = collection.view(kind, variable)?;
    let descriptor = collection.resolve(&view, index)?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);

    if read {
        let array = collection.read(&descriptor).await?;
        let finite: Vec<f32> = array.values.iter().copied().filter(|v| v.is_finite()).collect();
        let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
        let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        println!(
            "shape {:?}, {} values ({} missing), min {} max {}",
            array.shape,
            array.len(),
            array.len() - finite.len(),
            min,
            max
        );
    }

    Ok(())
}
