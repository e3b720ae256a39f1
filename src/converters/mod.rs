//! Feature Converters - Transform audio files into feature time series
//!
//! Each converter turns one audio file into a time-major feature matrix,
//! the rate of its rows in Hz, and one label per column:
//! - audio: decoding to mono samples at the extraction rate
//! - mel: (log) Mel-spectrogram with frequency-band labels

pub mod audio;
pub mod mel;

use ndarray::Array2;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use mel::MelSpectrogram;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConvertError {
    pub fn decode(path: &Path, reason: impl Into<String>) -> Self {
        ConvertError::Decode {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Features extracted from one file
#[derive(Debug, Clone)]
pub struct Features {
    /// Shape (time_frames, n_columns)
    pub matrix: Array2<f32>,
    /// Rows per second of audio
    pub sampling_frequency: f64,
    pub columns: Vec<String>,
}

impl Features {
    pub fn n_frames(&self) -> usize {
        self.matrix.nrows()
    }
}

/// A feature extractor usable by the batch driver.
///
/// Implementations own their parameters; the driver only hands over the
/// path of the file to convert.
pub trait FeatureExtractor {
    /// Short identifier used in log lines
    fn name(&self) -> &str;

    fn extract(&self, path: &Path) -> Result<Features, ConvertError>;
}
