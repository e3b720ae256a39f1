//! wav2bids - audio files to BIDS stimulus files
//!
//! Each input becomes `<stem>.tsv.gz`, a gzipped (log) Mel-spectrogram with
//! one row per frame, plus `<stem>.json` holding SamplingFrequency,
//! StartingTime and Columns.

mod batch;
mod bids;
mod config;
mod converters;
mod logging;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use crate::batch::BatchOptions;
use crate::config::MelParams;
use crate::converters::MelSpectrogram;

#[derive(Parser)]
#[command(name = "wav2bids")]
#[command(about = "Convert audio files to BIDS stimulus TSV files with JSON sidecars")]
struct Cli {
    /// Audio files, or a single quoted glob pattern such as 'stim/*.wav'
    #[arg(required = true, num_args = 1..)]
    file: Vec<String>,

    /// JSON (or YAML) file with Mel-spectrogram parameters
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory, defaults to the current directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start time in seconds relative to the first sample; one value for all
    /// files or one value per file
    #[arg(short = 't', long = "start-time", num_args = 1.., default_value = "0.0", allow_negative_numbers = true)]
    start_time: Vec<f64>,

    /// Continue with the next file when one fails
    #[arg(short, long)]
    keep_going: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write rotating log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging(cli.verbose, cli.log_dir.as_deref())?;

    let params = match &cli.config {
        Some(path) => {
            tracing::debug!("Loading config from {:?}", path);
            MelParams::load(path).context("Failed to load config")?
        }
        None => MelParams::default(),
    };

    let extractor = MelSpectrogram::new(params)?;
    tracing::debug!("Extraction parameters: {:?}", extractor.params());
    let options = BatchOptions {
        output_dir: cli.output,
        keep_going: cli.keep_going,
    };

    let summary = batch::convert_all(&extractor, &cli.file, &cli.start_time, &options)?;

    if !summary.failed.is_empty() {
        for (path, err) in &summary.failed {
            eprintln!("  [FAIL] {}: {}", path.display(), err);
        }
        anyhow::bail!(
            "{} of {} files failed",
            summary.failed.len(),
            summary.failed.len() + summary.converted.len()
        );
    }

    tracing::info!("Done: {} file(s) converted", summary.converted.len());
    Ok(())
}
