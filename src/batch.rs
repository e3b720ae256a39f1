//! Batch conversion - one TSV + JSON sidecar per input file
//!
//! Inputs are resolved (a single `*` pattern is globbed), paired with start
//! times, and converted strictly one after another.

use std::path::{Path, PathBuf};

use crate::bids::{self, OutputPaths};
use crate::converters::{ConvertError, FeatureExtractor};

/// One input file and the start time written to its sidecar
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub start_time: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Where outputs go; the current directory when unset
    pub output_dir: Option<PathBuf>,
    /// Log and skip failing files instead of aborting the batch
    pub keep_going: bool,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub converted: Vec<OutputPaths>,
    pub failed: Vec<(PathBuf, ConvertError)>,
}

/// Expand a lone glob pattern, otherwise take the arguments as paths
pub fn resolve_inputs(files: &[String]) -> Result<Vec<PathBuf>, ConvertError> {
    match files {
        [pattern] if pattern.contains('*') => expand_glob(pattern),
        _ => Ok(files.iter().map(PathBuf::from).collect()),
    }
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, ConvertError> {
    let entries = glob::glob(pattern)
        .map_err(|e| ConvertError::Config(format!("invalid glob pattern '{}': {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping unreadable match: {}", e),
        }
    }
    files.sort();

    if files.is_empty() {
        tracing::warn!("Pattern '{}' matched no files", pattern);
    } else {
        tracing::debug!("Pattern '{}' matched {} files", pattern, files.len());
    }
    Ok(files)
}

/// Pair files with start times: one value for all, or exactly one per file
pub fn pair_start_times(files: Vec<PathBuf>, start_times: &[f64]) -> Result<Vec<ConversionJob>, ConvertError> {
    if start_times.is_empty() {
        return Err(ConvertError::Config("at least one start time is required".into()));
    }
    if start_times.len() > 1 && start_times.len() != files.len() {
        return Err(ConvertError::Config(format!(
            "mismatched counts: {} files but {} start times (give one start time or one per file)",
            files.len(),
            start_times.len()
        )));
    }

    Ok(files
        .into_iter()
        .zip(start_times.iter().cycle())
        .map(|(input, &start_time)| ConversionJob { input, start_time })
        .collect())
}

/// Convert every file, writing `<stem>.tsv.gz` and `<stem>.json` for each
pub fn convert_all(
    extractor: &dyn FeatureExtractor,
    files: &[String],
    start_times: &[f64],
    options: &BatchOptions,
) -> Result<BatchSummary, ConvertError> {
    let jobs = pair_start_times(resolve_inputs(files)?, start_times)?;

    if let Some(dir) = &options.output_dir {
        if !dir.is_dir() {
            return Err(ConvertError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "output directory does not exist"),
            ));
        }
    }

    tracing::info!("Converting {} file(s) with the {} extractor", jobs.len(), extractor.name());

    let mut summary = BatchSummary::default();
    for (i, job) in jobs.iter().enumerate() {
        match convert_one(extractor, job, options.output_dir.as_deref()) {
            Ok(paths) => {
                tracing::info!(
                    "[{}/{}] {} -> {}",
                    i + 1,
                    jobs.len(),
                    job.input.display(),
                    paths.tsv.display()
                );
                summary.converted.push(paths);
            }
            Err(e) if options.keep_going => {
                crate::log_error!(e, file = %job.input.display());
                summary.failed.push((job.input.clone(), e));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(summary)
}

/// Extract one file and write both artifacts
pub fn convert_one(
    extractor: &dyn FeatureExtractor,
    job: &ConversionJob,
    output_dir: Option<&Path>,
) -> Result<OutputPaths, ConvertError> {
    let features = extractor.extract(&job.input)?;
    let paths = OutputPaths::for_input(&job.input, output_dir);
    bids::write_outputs(&paths, &features, job.start_time)?;
    Ok(paths)
}
