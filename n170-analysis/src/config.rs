use anyhow::{Context, Result, bail};
use n170_core::Condition;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::spectral::AperiodicMode;

/// Archive of the eegnb example recordings for the visual N170 experiment.
pub const N170_EXAMPLES_URL: &str =
    "https://drive.usercontent.google.com/download?id=1oStfxzEqf36R5d-2Auyw4DLnPj9E_FAH&export=download&confirm=t";

/// Settings of the aperiodic + periodic spectral model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralSettings {
    pub aperiodic_mode: AperiodicMode,
    /// Full width limits of a peak, Hz.
    pub peak_width_limits: (f64, f64),
    pub max_n_peaks: usize,
    /// Absolute height floor over the aperiodic fit, log10 power.
    pub min_peak_height: f64,
    /// Relative threshold, in standard deviations of the flattened spectrum.
    pub peak_threshold: f64,
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            aperiodic_mode: AperiodicMode::Knee,
            peak_width_limits: (0.5, 12.0),
            max_n_peaks: usize::MAX,
            min_peak_height: 0.0,
            peak_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Root of the local data cache; `None` means `~/.eegnb/data`.
    pub data_dir: Option<PathBuf>,
    pub experiment: String,
    pub site: String,
    pub device: String,
    pub subject: u32,
    pub session: u32,
    /// Zip archive downloaded when the site directory is missing.
    pub dataset_url: Option<String>,

    pub l_freq: f64,
    pub h_freq: f64,
    pub filter_order: usize,

    pub event_id: Vec<Condition>,
    pub tmin: f64,
    pub tmax: f64,
    /// Peak-to-peak rejection threshold, volts.
    pub reject_ptp: f64,
    pub picks: Vec<usize>,

    pub ci: f64,
    pub n_boot: usize,
    pub channel_order: Vec<usize>,

    /// Channel whose spectrum is parametrized.
    pub psd_channel: usize,
    pub freq_range: (f64, f64),
    pub spectral: SpectralSettings,

    pub output_dir: PathBuf,
    /// Skip figure rendering, numbers only.
    pub skip_plots: bool,
    pub seed: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            experiment: "visual-N170".to_string(),
            site: "eegnb_examples".to_string(),
            device: "muse2016_bfn".to_string(),
            subject: 1,
            session: 1,
            dataset_url: Some(N170_EXAMPLES_URL.to_string()),
            l_freq: 1.0,
            h_freq: 30.0,
            filter_order: 4,
            event_id: vec![Condition::House, Condition::Face],
            tmin: -0.1,
            tmax: 0.6,
            reject_ptp: 5e-5,
            picks: vec![0, 1, 2, 3],
            ci: 97.5,
            n_boot: 1000,
            channel_order: vec![1, 0, 2, 3],
            psd_channel: 3,
            freq_range: (1.0, 30.0),
            spectral: SpectralSettings::default(),
            output_dir: PathBuf::from("n170_figures"),
            skip_plots: false,
            seed: None,
        }
    }
}

impl AnalysisConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.l_freq > 0.0 && self.l_freq < self.h_freq) {
            bail!("invalid pass band {}-{} Hz", self.l_freq, self.h_freq);
        }
        if self.filter_order == 0 || self.filter_order % 2 != 0 {
            bail!("filter order must be even and positive, got {}", self.filter_order);
        }
        if self.tmin >= self.tmax {
            bail!("epoch window is empty: tmin {} >= tmax {}", self.tmin, self.tmax);
        }
        if !(self.ci > 0.0 && self.ci < 100.0) {
            bail!("ci must be a percentage, got {}", self.ci);
        }
        if self.event_id.is_empty() || self.picks.is_empty() {
            bail!("event_id and picks must not be empty");
        }
        let (lo, hi) = self.freq_range;
        if !(lo > 0.0 && lo < hi) {
            bail!("invalid frequency range [{lo}, {hi}]");
        }
        let (wl, wh) = self.spectral.peak_width_limits;
        if !(wl > 0.0 && wl < wh) {
            bail!("invalid peak width limits ({wl}, {wh})");
        }
        Ok(())
    }

    /// Data cache root, `~/.eegnb/data` unless overridden.
    pub fn data_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let home = std::env::var_os("HOME").context("HOME is not set and no data_dir configured")?;
        Ok(PathBuf::from(home).join(".eegnb").join("data"))
    }

    /// `<data_root>/<experiment>/<site>`
    pub fn site_dir(&self) -> Result<PathBuf> {
        Ok(self.data_root()?.join(&self.experiment).join(&self.site))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_n170_notebook() {
        let c = AnalysisConfig::default();
        assert_eq!((c.l_freq, c.h_freq), (1.0, 30.0));
        assert_eq!((c.tmin, c.tmax), (-0.1, 0.6));
        assert_eq!(c.reject_ptp, 5e-5);
        assert_eq!(c.channel_order, vec![1, 0, 2, 3]);
        assert_eq!(c.spectral.aperiodic_mode, AperiodicMode::Knee);
        c.validate().unwrap();
    }

    #[test]
    fn default_run_can_fetch_the_examples() {
        let c = AnalysisConfig::default();
        assert_eq!(c.dataset_url.as_deref(), Some(N170_EXAMPLES_URL));
    }

    #[test]
    fn site_dir_under_data_dir() {
        let c = AnalysisConfig {
            data_dir: Some(PathBuf::from("/data")),
            ..Default::default()
        };
        assert_eq!(c.site_dir().unwrap(), PathBuf::from("/data/visual-N170/eegnb_examples"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");
        fs::write(&path, r#"{ "subject": 3, "spectral": { "aperiodic_mode": "fixed" } }"#).unwrap();
        let c = AnalysisConfig::load(&path).unwrap();
        assert_eq!(c.subject, 3);
        assert_eq!(c.spectral.aperiodic_mode, AperiodicMode::Fixed);
        assert_eq!(c.spectral.peak_threshold, 2.0);
        assert_eq!(c.n_boot, 1000);
    }

    #[test]
    fn rejects_inverted_band() {
        let c = AnalysisConfig {
            l_freq: 40.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
