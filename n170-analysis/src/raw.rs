use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use ndarray::{Array2, Axis, concatenate};
use std::path::Path;

use crate::device::DeviceProfile;

/// Continuous recording: `data` is `[n_channels, n_samples]` in volts.
#[derive(Debug, Clone)]
pub struct RawRecording {
    pub sfreq: f64,
    pub ch_names: Vec<String>,
    pub data: Array2<f64>,
    /// Event codes, one per sample, 0 where nothing happened.
    pub stim: Vec<i32>,
}

impl RawRecording {
    pub fn new(
        sfreq: f64,
        ch_names: Vec<String>,
        data: Array2<f64>,
        stim: Vec<i32>,
    ) -> Result<Self> {
        if data.nrows() != ch_names.len() {
            bail!("{} channel names for {} data rows", ch_names.len(), data.nrows());
        }
        if data.ncols() != stim.len() {
            bail!("stim channel has {} samples, data has {}", stim.len(), data.ncols());
        }
        if !(sfreq > 0.0) {
            bail!("sampling rate must be positive, got {sfreq}");
        }
        Ok(Self { sfreq, ch_names, data, stim })
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    pub fn duration_s(&self) -> f64 {
        self.n_times() as f64 / self.sfreq
    }

    /// Read one session CSV. Channel columns are located by name and scaled
    /// from microvolts to volts; the stim column is kept as integer codes.
    pub fn from_csv(path: &Path, profile: &DeviceProfile) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("failed to open recording {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("{}: missing header row", path.display()))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow!("{}: no column named {name:?}", path.display()))
        };
        let ch_cols = profile
            .channels
            .iter()
            .map(|c| column(*c))
            .collect::<Result<Vec<_>>>()?;
        let stim_col = column(profile.stim_column)?;

        let mut samples: Vec<f64> = Vec::new();
        let mut stim = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record =
                record.with_context(|| format!("{}: bad row {}", path.display(), row + 2))?;
            for &c in &ch_cols {
                let v: f64 = parse_field(&record, c)
                    .with_context(|| format!("{}: row {}", path.display(), row + 2))?;
                samples.push(v * 1e-6);
            }
            let code: f64 = parse_field(&record, stim_col)
                .with_context(|| format!("{}: row {}", path.display(), row + 2))?;
            stim.push(code.round() as i32);
        }

        let n_ch = ch_cols.len();
        let n_times = stim.len();
        // rows were read sample-major
        let data = Array2::from_shape_vec((n_times, n_ch), samples)?
            .reversed_axes()
            .as_standard_layout()
            .to_owned();
        debug!("{}: {} samples x {} channels", path.display(), n_times, n_ch);
        Self::new(
            profile.sfreq,
            profile.channels.iter().map(|c| c.to_string()).collect(),
            data,
            stim,
        )
    }

    /// Load and concatenate every file of a session, in the given order.
    pub fn load_session(files: &[impl AsRef<Path>], profile: &DeviceProfile) -> Result<Self> {
        let parts = files
            .iter()
            .map(|f| Self::from_csv(f.as_ref(), profile))
            .collect::<Result<Vec<_>>>()?;
        let raw = Self::concatenate(parts)?;
        info!(
            "loaded {} files: {} channels, {:.1} s at {} Hz",
            files.len(),
            raw.n_channels(),
            raw.duration_s(),
            raw.sfreq
        );
        Ok(raw)
    }

    pub fn concatenate(parts: Vec<RawRecording>) -> Result<Self> {
        let mut iter = parts.into_iter();
        let Some(first) = iter.next() else {
            bail!("no recordings to concatenate");
        };
        let rest: Vec<RawRecording> = iter.collect();
        if rest.is_empty() {
            return Ok(first);
        }
        for r in &rest {
            if r.sfreq != first.sfreq || r.ch_names != first.ch_names {
                bail!("cannot concatenate recordings with different channels or sampling rates");
            }
        }
        let views: Vec<_> = std::iter::once(&first)
            .chain(rest.iter())
            .map(|r| r.data.view())
            .collect();
        let data = concatenate(Axis(1), &views)?;
        let mut stim = first.stim.clone();
        for r in &rest {
            stim.extend_from_slice(&r.stim);
        }
        Self::new(first.sfreq, first.ch_names.clone(), data, stim)
    }
}

fn parse_field(record: &csv::StringRecord, idx: usize) -> Result<f64> {
    let field = record.get(idx).ok_or_else(|| anyhow!("missing column {idx}"))?;
    field
        .parse::<f64>()
        .with_context(|| format!("not a number: {field:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HEADER: &str = "timestamps,TP9,AF7,AF8,TP10,Right AUX,stim\n";

    #[test]
    fn reads_channels_in_volts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.csv");
        fs::write(
            &path,
            format!("{HEADER}0.0,10,20,30,40,0,0\n0.0039,-5,0,5,1,0,2\n"),
        )
        .unwrap();
        let profile = DeviceProfile::lookup("muse2016_bfn").unwrap();
        let raw = RawRecording::from_csv(&path, profile).unwrap();
        assert_eq!(raw.data.dim(), (4, 2));
        approx::assert_abs_diff_eq!(raw.data[[1, 0]], 20e-6, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(raw.data[[0, 1]], -5e-6, epsilon = 1e-12);
        assert_eq!(raw.stim, vec![0, 2]);
        assert_eq!(raw.ch_names[3], "TP10");
    }

    #[test]
    fn missing_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.csv");
        fs::write(&path, "timestamps,TP9,stim\n0,1,0\n").unwrap();
        let profile = DeviceProfile::lookup("muse2016_bfn").unwrap();
        let err = RawRecording::from_csv(&path, profile).unwrap_err();
        assert!(err.to_string().contains("AF7"));
    }

    #[test]
    fn session_files_are_concatenated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, format!("{HEADER}0,1,1,1,1,0,0\n")).unwrap();
        fs::write(&b, format!("{HEADER}0,2,2,2,2,0,1\n0,3,3,3,3,0,0\n")).unwrap();
        let profile = DeviceProfile::lookup("muse2016").unwrap();
        let raw = RawRecording::load_session(&[a, b], profile).unwrap();
        assert_eq!(raw.n_times(), 3);
        assert_eq!(raw.stim, vec![0, 1, 0]);
        approx::assert_abs_diff_eq!(raw.data[[2, 2]], 3e-6, epsilon = 1e-12);
    }
}
