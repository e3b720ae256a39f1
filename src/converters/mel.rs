//! Mel Spectrogram Converter
//!
//! Short-time Fourier transform with a periodic Hann window, triangular
//! filters spaced on the Mel scale, and an optional natural-log transform.
//! Frequencies are handled in f64, samples and spectra in f32.

use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;
use std::borrow::Cow;
use std::path::Path;

use super::{audio, ConvertError, FeatureExtractor, Features};
use crate::config::{MelNorm, MelParams, PadMode};

/// Entries this close to zero are floored before taking the log
const ZERO_TOLERANCE: f32 = 1e-8;

// Slaney Mel scale: linear below 1 kHz, logarithmic above
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4_f64.ln() / 27.0
}

/// Convert a frequency in Hz to Mel (HTK or Slaney formula)
pub fn hz_to_mel(hz: f64, htk: bool) -> f64 {
    if htk {
        2595.0 * (1.0 + hz / 700.0).log10()
    } else if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

/// Convert Mel back to Hz (HTK or Slaney formula)
pub fn mel_to_hz(mel: f64, htk: bool) -> f64 {
    if htk {
        700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
    } else if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * ((mel - MIN_LOG_MEL) * log_step()).exp()
    } else {
        F_SP * mel
    }
}

/// `n` frequencies evenly spaced on the Mel axis from `fmin` to `fmax` inclusive
pub fn mel_frequencies(n: usize, fmin: f64, fmax: f64, htk: bool) -> Vec<f64> {
    let lo = hz_to_mel(fmin, htk);
    let hi = hz_to_mel(fmax, htk);
    match n {
        0 => Vec::new(),
        1 => vec![mel_to_hz(lo, htk)],
        _ => (0..n)
            .map(|i| mel_to_hz(lo + (hi - lo) * i as f64 / (n - 1) as f64, htk))
            .collect(),
    }
}

/// The parameters that place the bands on the frequency axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelScale {
    pub n_mels: usize,
    pub fmin: f64,
    pub fmax: f64,
    pub htk: bool,
}

impl MelScale {
    /// One frequency in Hz per band
    pub fn frequencies(&self) -> Vec<f64> {
        mel_frequencies(self.n_mels, self.fmin, self.fmax, self.htk)
    }
}

/// Column labels such as `"440 Hz (Log Mel)"`
pub fn band_labels(frequencies: &[f64], log: bool) -> Vec<String> {
    let qualifier = if log { "Log " } else { "" };
    frequencies
        .iter()
        .map(|f| format!("{:.0} Hz ({}Mel)", f, qualifier))
        .collect()
}

/// Triangular Mel filters, shape (n_mels, 1 + n_fft / 2)
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, scale: &MelScale, norm: Option<MelNorm>) -> Array2<f32> {
    let n_freqs = n_fft / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| if n_freqs > 1 { nyquist * k as f64 / (n_freqs - 1) as f64 } else { 0.0 })
        .collect();

    // n_mels + 2 edges: filter m rises from edge m, peaks at m + 1, falls to m + 2
    let edges = mel_frequencies(scale.n_mels + 2, scale.fmin, scale.fmax, scale.htk);
    let mut weights = Array2::<f32>::zeros((scale.n_mels, n_freqs));

    for m in 0..scale.n_mels {
        let (lo, centre, hi) = (edges[m], edges[m + 1], edges[m + 2]);
        let enorm = match norm {
            Some(MelNorm::Slaney) => 2.0 / (hi - lo),
            None => 1.0,
        };

        for (k, &f) in fft_freqs.iter().enumerate() {
            let rising = (f - lo) / (centre - lo);
            let falling = (hi - f) / (hi - centre);
            weights[[m, k]] = (rising.min(falling).max(0.0) * enorm) as f32;
        }
    }

    let empty = weights.rows().into_iter().filter(|row| row.iter().all(|&w| w == 0.0)).count();
    if empty > 0 {
        tracing::warn!(
            "{} of {} Mel filters are empty; n_mels may be too high for n_fft={}",
            empty,
            scale.n_mels,
            n_fft
        );
    }

    weights
}

/// Periodic Hann window of `win_length`, zero-padded to `n_fft` around the centre
fn hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0_f32; n_fft];
    for (i, w) in window[offset..offset + win_length].iter_mut().enumerate() {
        *w = 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / win_length as f32).cos();
    }
    window
}

/// Mirror index `i` into `0..len` without repeating the edge sample
fn reflect_index(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let m = i.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

fn pad_signal(samples: &[f32], pad: usize, mode: PadMode) -> Vec<f32> {
    match mode {
        PadMode::Constant => {
            let mut padded = vec![0.0_f32; samples.len() + 2 * pad];
            padded[pad..pad + samples.len()].copy_from_slice(samples);
            padded
        }
        PadMode::Reflect => {
            let pad = pad as isize;
            (-pad..samples.len() as isize + pad)
                .map(|i| samples[reflect_index(i, samples.len())])
                .collect()
        }
    }
}

/// STFT magnitude raised to `power`, shape (1 + n_fft / 2, frames)
fn power_spectrogram(samples: &[f32], params: &MelParams) -> Result<Array2<f32>, String> {
    let n_fft = params.n_fft;
    let hop = params.hop_length;

    if samples.is_empty() {
        return Err("no audio samples".into());
    }

    let signal: Cow<[f32]> = if params.center {
        Cow::Owned(pad_signal(samples, n_fft / 2, params.pad_mode))
    } else {
        Cow::Borrowed(samples)
    };
    if signal.len() < n_fft {
        return Err(format!(
            "signal of {} samples is shorter than n_fft={}",
            samples.len(),
            n_fft
        ));
    }

    let n_frames = 1 + (signal.len() - n_fft) / hop;
    let n_freqs = n_fft / 2 + 1;
    let window = hann_window(params.win_length(), n_fft);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut buffer = vec![Complex::new(0.0_f32, 0.0); n_fft];
    let mut spectrum = Array2::<f32>::zeros((n_freqs, n_frames));

    for t in 0..n_frames {
        let frame = &signal[t * hop..t * hop + n_fft];
        for ((slot, &s), &w) in buffer.iter_mut().zip(frame).zip(&window) {
            *slot = Complex::new(s * w, 0.0);
        }

        fft.process(&mut buffer);

        for (k, c) in buffer.iter().take(n_freqs).enumerate() {
            spectrum[[k, t]] = if params.power == 2.0 {
                c.norm_sqr()
            } else {
                c.norm().powf(params.power)
            };
        }
    }

    tracing::trace!("STFT: {} frames x {} bins", n_frames, n_freqs);
    Ok(spectrum)
}

/// Natural log in place, flooring entries that are numerically zero.
///
/// The floor is `f32::MIN_POSITIVE`, so silent bins come out near -87.3;
/// tools that floor at machine epsilon instead report about -15.9 there.
pub fn log_scale(values: &mut Array2<f32>) -> Result<(), String> {
    if let Some(bad) = values.iter().find(|v| v.is_nan() || **v < -ZERO_TOLERANCE) {
        return Err(format!("spectrogram contains {}, which has no logarithm", bad));
    }
    values.mapv_inplace(|v| {
        let v = if v.abs() <= ZERO_TOLERANCE { f32::MIN_POSITIVE } else { v };
        v.ln()
    });
    Ok(())
}

/// Mel-spectrogram feature extractor
#[derive(Debug, Clone)]
pub struct MelSpectrogram {
    params: MelParams,
    filters: Array2<f32>,
}

impl MelSpectrogram {
    pub fn new(params: MelParams) -> Result<Self, ConvertError> {
        params.validate()?;
        let filters = mel_filterbank(params.sample_rate, params.n_fft, &params.mel_scale(), params.norm);
        Ok(Self { params, filters })
    }

    pub fn params(&self) -> &MelParams {
        &self.params
    }

    /// Band-major Mel power spectrogram before any log, shape (n_mels, frames)
    pub fn raw_spectrogram(&self, samples: &[f32]) -> Result<Array2<f32>, String> {
        let spectrum = power_spectrogram(samples, &self.params)?;
        Ok(self.filters.dot(&spectrum))
    }

    /// Features of a mono signal already sampled at `params.sample_rate`
    pub fn features_from_samples(&self, samples: &[f32]) -> Result<Features, String> {
        let mut mel = self.raw_spectrogram(samples)?;
        if self.params.log {
            log_scale(&mut mel)?;
        }

        // Time-major output: one row per frame
        let matrix = mel.reversed_axes().as_standard_layout().into_owned();
        let columns = band_labels(&self.params.mel_scale().frequencies(), self.params.log);
        debug_assert_eq!(matrix.ncols(), columns.len());

        Ok(Features {
            matrix,
            sampling_frequency: self.params.frame_rate(),
            columns,
        })
    }
}

impl FeatureExtractor for MelSpectrogram {
    fn name(&self) -> &str {
        "mel"
    }

    fn extract(&self, path: &Path) -> Result<Features, ConvertError> {
        let wave = audio::load(path, self.params.sample_rate)?;
        let features = self
            .features_from_samples(&wave.samples)
            .map_err(|reason| ConvertError::decode(path, reason))?;

        tracing::debug!(
            "{}: {:.2}s -> {} frames x {} bands @ {}Hz",
            path.display(),
            wave.duration_secs(),
            features.n_frames(),
            features.columns.len(),
            features.sampling_frequency
        );
        Ok(features)
    }
}
