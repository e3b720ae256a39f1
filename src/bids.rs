//! BIDS stimulus output - gzipped TSV time series plus JSON sidecar

use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::converters::{ConvertError, Features};

/// Sampling metadata written next to each TSV file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sidecar {
    pub sampling_frequency: f64,
    pub starting_time: f64,
    pub columns: Vec<String>,
}

impl Sidecar {
    pub fn new(features: &Features, starting_time: f64) -> Self {
        Self {
            sampling_frequency: features.sampling_frequency,
            starting_time,
            columns: features.columns.clone(),
        }
    }
}

/// Where the two artifacts of one input file go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub tsv: PathBuf,
    pub json: PathBuf,
}

impl OutputPaths {
    pub fn for_input(input: &Path, output_dir: Option<&Path>) -> Self {
        let stem = output_stem(input);
        let dir = output_dir.unwrap_or_else(|| Path::new(""));
        Self {
            tsv: dir.join(format!("{}.tsv.gz", stem)),
            json: dir.join(format!("{}.json", stem)),
        }
    }
}

/// File name without directory and without anything from the first dot on.
///
/// `stim/run-1.wav` gives `run-1`, `a.b.wav` gives `a`. Names that start with
/// a dot fall back to the regular path stem.
pub fn output_stem(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name),
    }
}

/// Format like C's `%.18e`: `1.500000000000000000e+00`
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let formatted = format!("{:.18e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => formatted,
    }
}

/// Write rows as tab-separated text, gzip-compressed, no header
pub fn write_tsv_gz(path: &Path, matrix: &Array2<f32>) -> Result<(), ConvertError> {
    let io_err = |e| ConvertError::io(path, e);

    let file = File::create(path).map_err(io_err)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

    let mut line = String::new();
    for row in matrix.rows() {
        line.clear();
        for (i, &value) in row.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&format_value(value as f64));
        }
        line.push('\n');
        encoder.write_all(line.as_bytes()).map_err(io_err)?;
    }

    encoder.finish().map_err(io_err)?.flush().map_err(io_err)?;
    Ok(())
}

pub fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<(), ConvertError> {
    let json = serde_json::to_string_pretty(sidecar)
        .map_err(|e| ConvertError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(path, json).map_err(|e| ConvertError::io(path, e))
}

/// Write both artifacts for one converted file
pub fn write_outputs(paths: &OutputPaths, features: &Features, starting_time: f64) -> Result<(), ConvertError> {
    write_tsv_gz(&paths.tsv, &features.matrix)?;
    write_sidecar(&paths.json, &Sidecar::new(features, starting_time))?;
    tracing::debug!("Wrote {:?} and {:?}", paths.tsv, paths.json);
    Ok(())
}

/// Read a gzipped TSV back as rows of floats
#[cfg(test)]
pub fn read_tsv_gz(path: &Path) -> anyhow::Result<Vec<Vec<f64>>> {
    use flate2::read::GzDecoder;
    use std::io::{BufRead, BufReader};

    let reader = BufReader::new(GzDecoder::new(File::open(path)?));
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split('\t')
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Features {
        Features {
            matrix: Array2::from_shape_vec((2, 3), vec![0.1, -2.5, 1e-7, 3.0, f32::MIN_POSITIVE.ln(), 12345.678])
                .unwrap(),
            sampling_frequency: 86.1328125,
            columns: vec!["0 Hz (Log Mel)".into(), "10 Hz (Log Mel)".into(), "20 Hz (Log Mel)".into()],
        }
    }

    #[test]
    fn test_output_stem() {
        assert_eq!(output_stem(Path::new("stim/run-1.wav")), "run-1");
        assert_eq!(output_stem(Path::new("/data/a.b.wav")), "a");
        assert_eq!(output_stem(Path::new("noext")), "noext");
        assert_eq!(output_stem(Path::new(".hidden.wav")), ".hidden");
    }

    #[test]
    fn test_output_paths() {
        let paths = OutputPaths::for_input(Path::new("in/a.wav"), Some(Path::new("out")));
        assert_eq!(paths.tsv, PathBuf::from("out/a.tsv.gz"));
        assert_eq!(paths.json, PathBuf::from("out/a.json"));

        let paths = OutputPaths::for_input(Path::new("in/a.wav"), None);
        assert_eq!(paths.tsv, PathBuf::from("a.tsv.gz"));
        assert_eq!(paths.json, PathBuf::from("a.json"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1.5), "1.500000000000000000e+00");
        assert_eq!(format_value(-(2.0_f64.powi(-12))), "-2.441406250000000000e-04");
        assert_eq!(format_value(0.0), "0.000000000000000000e+00");
        assert_eq!(format_value(2.0_f64.powi(400)), "2.582249878086908590e+120");
        assert_eq!(format_value(f64::NAN), "nan");
    }

    #[test]
    fn test_tsv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tsv.gz");
        let features = features();

        write_tsv_gz(&path, &features.matrix).unwrap();
        let rows = read_tsv_gz(&path).unwrap();

        assert_eq!(rows.len(), 2);
        for (row, expected) in rows.iter().zip(features.matrix.rows()) {
            assert_eq!(row.len(), 3);
            for (&got, &want) in row.iter().zip(expected.iter()) {
                assert!((got as f32 - want).abs() <= want.abs() * 1e-6);
            }
        }
    }

    #[test]
    fn test_sidecar_has_exactly_three_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        write_sidecar(&path, &Sidecar::new(&features(), 0.5)).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["SamplingFrequency"], 86.1328125);
        assert_eq!(obj["StartingTime"], 0.5);
        assert_eq!(obj["Columns"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::for_input(Path::new("a.wav"), Some(dir.path().join("missing").as_path()));

        let err = write_outputs(&paths, &features(), 0.0).unwrap_err();
        assert!(matches!(err, ConvertError::Io { .. }));
    }
}
