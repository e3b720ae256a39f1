//! Configuration loader - extraction parameters from JSON (or YAML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::converters::mel::MelScale;
use crate::converters::ConvertError;

/// How the signal is padded when frames are centred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMode {
    Constant,
    Reflect,
}

/// Area normalisation applied to the Mel filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelNorm {
    Slaney,
}

/// Mel-spectrogram parameters, every key optional in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MelParams {
    pub log: bool,
    #[serde(alias = "sr")]
    pub sample_rate: u32,
    pub hop_length: usize,
    pub n_fft: usize,
    pub win_length: Option<usize>,
    pub center: bool,
    pub pad_mode: PadMode,
    pub power: f32,
    pub n_mels: usize,
    pub fmin: f32,
    pub fmax: Option<f32>,
    pub htk: bool,
    pub norm: Option<MelNorm>,
}

impl Default for MelParams {
    fn default() -> Self {
        Self {
            log: true,
            sample_rate: 44100,
            hop_length: 512,
            n_fft: 2048,
            win_length: None,
            center: true,
            pad_mode: PadMode::Constant,
            power: 2.0,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            htk: false,
            norm: Some(MelNorm::Slaney),
        }
    }
}

impl MelParams {
    /// Load parameters from a JSON file, or YAML when the extension says so
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConvertError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let params: MelParams = if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| ConvertError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| ConvertError::Config(format!("{}: {}", path.display(), e)))?
        };

        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        let fail = |msg: String| Err(ConvertError::Config(msg));

        if self.sample_rate == 0 {
            return fail("sample_rate must be positive".into());
        }
        if self.hop_length == 0 {
            return fail("hop_length must be positive".into());
        }
        if self.n_fft == 0 {
            return fail("n_fft must be positive".into());
        }
        if self.n_mels == 0 {
            return fail("n_mels must be positive".into());
        }
        if let Some(win) = self.win_length {
            if win == 0 || win > self.n_fft {
                return fail(format!("win_length must be in 1..={}, got {}", self.n_fft, win));
            }
        }
        if !(self.power > 0.0) {
            return fail(format!("power must be positive, got {}", self.power));
        }
        if !(self.fmin >= 0.0) {
            return fail(format!("fmin must be non-negative, got {}", self.fmin));
        }
        if !(self.fmax_hz() > self.fmin) {
            return fail(format!(
                "fmax ({}) must be greater than fmin ({})",
                self.fmax_hz(),
                self.fmin
            ));
        }
        Ok(())
    }

    /// Upper filter edge, Nyquist unless configured
    pub fn fmax_hz(&self) -> f32 {
        self.fmax.unwrap_or(self.sample_rate as f32 / 2.0)
    }

    pub fn win_length(&self) -> usize {
        self.win_length.unwrap_or(self.n_fft)
    }

    /// Feature rows per second of audio
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_length as f64
    }

    /// The subset of parameters that decides band centre frequencies
    pub fn mel_scale(&self) -> MelScale {
        MelScale {
            n_mels: self.n_mels,
            fmin: self.fmin as f64,
            fmax: self.fmax_hz() as f64,
            htk: self.htk,
        }
    }
}
