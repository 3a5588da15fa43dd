//! pagescribe - batch transcription of scanned page images.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use pagescribe::config::{Overrides, RunConfig};
use pagescribe::pipeline::sinks::render::format_duration;
use pagescribe::pipeline::ProgressEvent;

#[derive(Parser, Debug)]
#[command(name = "pagescribe")]
#[command(about = "Transcribe folders of scanned page images with a vision model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe the images selected by a run configuration
    Run(RunArgs),
    /// Report page numbers found in a local folder's filenames
    Scan {
        /// Folder to inspect
        #[arg(short, long)]
        dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON run configuration
    #[arg(short, long, env = "PAGESCRIBE_CONFIG")]
    config: PathBuf,

    /// First page number to process (overrides file and environment)
    #[arg(long)]
    start_ordinal: Option<u64>,

    /// Maximum number of images (0 = all)
    #[arg(long)]
    count: Option<usize>,

    /// Images per document flush
    #[arg(long)]
    batch_size: Option<usize>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Retry only this image; repeat for several
    #[arg(long = "retry-image")]
    retry_images: Vec<String>,
}

fn main() -> Result<()> {
    pagescribe::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Scan { dir } => scan(dir),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = RunConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.apply_env().context("Invalid environment override")?;
    config.apply_overrides(&Overrides {
        start_ordinal: args.start_ordinal,
        count: args.count,
        batch_size: args.batch_size,
        model: args.model,
        retry_images: args.retry_images,
    });

    let report = pagescribe::run_from_config(&config, Some(&print_progress)).context("Run failed")?;

    let summary = &report.summary;
    println!(
        "{}: {} transcribed, {} failed in {}",
        summary.completion_status.as_str(),
        summary.processed_count,
        summary.failed_count,
        format_duration(summary.elapsed_seconds)
    );
    if let Some(cost) = summary.estimated_cost_usd {
        println!("Estimated cost: ${cost:.4}");
    }
    if let Some(destination) = &report.destination {
        println!("Output: {}", destination.location);
    }
    if let Some(path) = &report.fallback_path {
        println!("Local fallback copy: {}", path.display());
    }
    if let Some(hint) = &report.retry_hint {
        println!("{}", hint.message);
    }
    Ok(())
}

fn print_progress(event: ProgressEvent) {
    match event {
        ProgressEvent::ImageDone {
            index,
            total,
            name,
            ok,
            eta_seconds,
        } => {
            let status = if ok { "ok" } else { "FAILED" };
            println!(
                "[{index}/{total}] {name} {status} (ETA {})",
                format_duration(eta_seconds)
            );
        }
        ProgressEvent::Failed {
            resume: Some(resume),
            ..
        } => eprintln!("{resume}"),
        _ => {}
    }
}

fn scan(dir: PathBuf) -> Result<()> {
    let scan = pagescribe::scan_folder(&dir)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    println!("Page numbers: {} ({} found)", scan.range_label(), scan.numbers.len());
    println!("Pattern: {}", scan.pattern_hint);
    Ok(())
}
