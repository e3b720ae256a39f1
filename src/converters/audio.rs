//! Audio decoding - audio files to mono samples at the extraction rate
//!
//! WAV files are read with hound, everything else goes through symphonia.
//! WAV files hound cannot parse get a second try through symphonia.
//! Multi-channel audio is averaged down to mono, then resampled with rubato
//! when the native rate differs from the requested one.

use rubato::{FftFixedInOut, Resampler};
use std::path::Path;

use super::ConvertError;

/// Mono audio at a known sample rate
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load an audio file as mono samples at `sample_rate` Hz
pub fn load(path: &Path, sample_rate: u32) -> Result<Waveform, ConvertError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let native = match ext.as_str() {
        "wav" | "wave" => match decode_wav(path) {
            Ok(wave) => wave,
            Err(e) => {
                // 64-bit float and some extensible layouts are beyond hound
                tracing::debug!("hound could not read {}: {}; trying symphonia", path.display(), e);
                decode_symphonia(path, &ext).map_err(|_| e)?
            }
        },
        _ => decode_symphonia(path, &ext)?,
    };

    if native.samples.is_empty() {
        return Err(ConvertError::decode(path, "no audio samples"));
    }

    tracing::debug!(
        "Decoded {} samples @ {}Hz from {}",
        native.samples.len(),
        native.sample_rate,
        path.display()
    );

    let samples = resample(&native.samples, native.sample_rate, sample_rate)
        .map_err(|e| ConvertError::decode(path, format!("resampling failed: {}", e)))?;

    Ok(Waveform {
        samples,
        sample_rate,
    })
}

/// Read a WAV file and average its channels
fn decode_wav(path: &Path) -> Result<Waveform, ConvertError> {
    let reader = hound::WavReader::open(path).map_err(|e| ConvertError::decode(path, e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<f32>, hound::Error>>()
            .map_err(|e| ConvertError::decode(path, e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<Vec<f32>, hound::Error>>()
                .map_err(|e| ConvertError::decode(path, e.to_string()))?
        }
    };

    Ok(Waveform {
        samples: downmix(samples, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Decode any other container/codec symphonia knows about
fn decode_symphonia(path: &Path, ext: &str) -> Result<Waveform, ConvertError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path).map_err(|e| ConvertError::decode(path, e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if !ext.is_empty() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ConvertError::decode(path, e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ConvertError::decode(path, "no audio track found"))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ConvertError::decode(path, e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut max_frames: usize = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(ConvertError::decode(path, e.to_string())),
        };

        // Skip packets from other tracks
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(ConvertError::decode(path, e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        sample_rate.get_or_insert(spec.rate);

        // Reallocate only when a packet is bigger than any seen so far
        let num_frames = decoded.capacity();
        if sample_buf.is_none() || num_frames > max_frames {
            sample_buf = Some(SampleBuffer::<f32>::new(num_frames as u64, spec));
            max_frames = num_frames;
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        for chunk in buf.samples().chunks(channels) {
            samples.push(chunk.iter().sum::<f32>() / chunk.len() as f32);
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| ConvertError::decode(path, "unknown sample rate"))?;

    Ok(Waveform {
        samples,
        sample_rate,
    })
}

/// Average interleaved frames down to one channel
fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Input frames per FFT block before rounding to whole rate units
const RESAMPLE_BLOCK: usize = 1024;

/// Band-limited resampling of mono audio from `from_rate` to `to_rate`.
///
/// The signal is fed to rubato's FFT resampler in fixed-size blocks. Each
/// block holds an even number of rate units, which keeps the filter delay a
/// whole number of output frames. Those leading frames are dropped and the
/// result is sized to `ceil(len * to_rate / from_rate)`.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(format!("cannot resample {}Hz -> {}Hz", from_rate, to_rate));
    }

    let (from, to) = (from_rate as usize, to_rate as usize);
    let unit = from / gcd(from, to);
    let units = RESAMPLE_BLOCK.div_ceil(unit).next_multiple_of(2);

    let mut resampler = FftFixedInOut::<f32>::new(from, to, units * unit, 1).map_err(|e| e.to_string())?;
    let block = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * to as f64 / from as f64).ceil() as usize;

    tracing::debug!(
        "Resampling {} samples from {}Hz to {}Hz (block {}, delay {})",
        samples.len(),
        from_rate,
        to_rate,
        block,
        delay
    );

    let mut input = vec![0.0_f32; block];
    let mut output = resampler.output_buffer_allocate(true);
    let mut out = Vec::with_capacity(delay + expected + resampler.output_frames_max());
    let mut pos = 0;

    // Zero blocks past the end flush the filter tail
    while out.len() < delay + expected {
        let rest = samples.get(pos..).unwrap_or(&[]);
        let n = rest.len().min(block);
        input[..n].copy_from_slice(&rest[..n]);
        input[n..].fill(0.0);

        let (_, written) = resampler
            .process_into_buffer(&[&input[..]], &mut output[..], None)
            .map_err(|e| e.to_string())?;
        out.extend_from_slice(&output[0][..written]);
        pos += block;
    }

    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<Vec<i16>> = (0..100).map(|_| vec![16384, 0]).collect();
        write_wav(&path, 2, 8000, &frames);

        let wave = load(&path, 8000).unwrap();
        assert_eq!(wave.samples.len(), 100);
        assert_eq!(wave.sample_rate, 8000);
        assert!(wave.samples.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    /// Largest deviation from the ideal tone away from the signal edges
    fn max_error(resampled: &[f32], ideal: &[f32], margin: usize) -> f32 {
        resampled[margin..resampled.len() - margin]
            .iter()
            .zip(&ideal[margin..])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_native_rate_is_resampled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let frames: Vec<Vec<i16>> = sine(440.0, 8000, 8000)
            .into_iter()
            .map(|s| vec![(s * 10000.0) as i16])
            .collect();
        write_wav(&path, 1, 8000, &frames);

        let wave = load(&path, 16000).unwrap();
        assert_eq!(wave.sample_rate, 16000);
        assert_eq!(wave.samples.len(), 16000);
        assert!((wave.duration_secs() - 1.0).abs() < 1e-9);

        let ideal: Vec<f32> = sine(440.0, 16000, 16000).iter().map(|s| s * 10000.0 / 32768.0).collect();
        assert!(max_error(&wave.samples, &ideal, 2000) < 0.005);
    }

    #[test]
    fn test_upsampled_tone_keeps_amplitude_and_phase() {
        let out = resample(&sine(440.0, 8000, 8000), 8000, 16000).unwrap();
        let ideal = sine(440.0, 16000, 16000);
        assert_eq!(out.len(), ideal.len());

        assert!(max_error(&out, &ideal, 2000) < 0.01);

        // One sample of lag is already a visible error at this frequency
        let shifted = max_error(&out[1..], &ideal, 2000);
        assert!(shifted > 0.1, "lag of one sample not detected: {}", shifted);
    }

    #[test]
    fn test_downsampled_tone_keeps_amplitude_and_phase() {
        let out = resample(&sine(1000.0, 44100, 44100), 44100, 16000).unwrap();
        let ideal = sine(1000.0, 16000, 16000);
        assert_eq!(out.len(), 16000);
        assert!(max_error(&out, &ideal, 2000) < 0.01);
    }

    #[test]
    fn test_tone_above_new_nyquist_is_removed() {
        let input = sine(15000.0, 44100, 44100);
        let out = resample(&input, 44100, 16000).unwrap();
        assert_eq!(out.len(), 16000);

        assert!(rms(&input) > 0.7);
        let interior = rms(&out[1000..15000]);
        assert!(interior < 0.01, "15 kHz tone leaked through as {}", interior);
    }

    #[test]
    fn test_resample_handles_coprime_rates() {
        let out = resample(&sine(300.0, 11025, 11025), 11025, 8000).unwrap();
        assert_eq!(out.len(), 8000);
        assert!(max_error(&out, &sine(300.0, 8000, 8000), 2000) < 0.01);
    }

    #[test]
    fn test_short_signal_is_flushed() {
        let out = resample(&[0.5; 10], 8000, 16000).unwrap();
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(44100, 16000), 100);
        assert_eq!(gcd(22050, 44100), 22050);
        assert_eq!(gcd(7, 5), 1);
    }

    #[test]
    fn test_resample_same_rate_is_copy() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 44100, 44100).unwrap(), input);
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let err = load(Path::new("does/not/exist.wav"), 44100).unwrap_err();
        assert!(matches!(err, ConvertError::Decode { .. }));
    }

    #[test]
    fn test_garbage_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();

        let err = load(&path, 44100).unwrap_err();
        assert!(matches!(err, ConvertError::Decode { .. }));
    }

    #[test]
    fn test_empty_wav_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_wav(&path, 1, 44100, &[]);

        let err = load(&path, 44100).unwrap_err();
        assert!(err.to_string().contains("no audio samples"));
    }

    /// Mono IEEE float WAV with 64-bit samples, which hound refuses
    fn write_f64_wav(path: &Path, sample_rate: u32, samples: &[f64]) {
        let data_len = (samples.len() * 8) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 8).to_le_bytes());
        bytes.extend_from_slice(&8u16.to_le_bytes());
        bytes.extend_from_slice(&64u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_wav_hound_rejects_falls_back_to_symphonia() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("double.wav");
        let samples: Vec<f64> = (0..800).map(|i| (i as f64 / 800.0) - 0.5).collect();
        write_f64_wav(&path, 8000, &samples);
        assert!(hound::WavReader::open(&path).is_err());

        let wave = load(&path, 8000).unwrap();
        assert_eq!(wave.samples.len(), 800);
        assert!((wave.samples[0] + 0.5).abs() < 1e-6);
        assert!((wave.samples[400] - 0.0).abs() < 1e-6);
    }
}
