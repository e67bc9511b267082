use anyhow::{Context, Result, bail};
use n170_core::Condition;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::DeviceBackend;

/// Where the images of one condition live, relative to the stimulus root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusSource {
    pub condition: Condition,
    pub dir: PathBuf,
    /// File name wildcard, `*` and `?` only.
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub name: String,
    pub duration_s: f64,
    pub n_trials: usize,
    pub iti_s: f64,
    pub soa_s: f64,
    pub jitter_s: f64,
    pub stimulus_root: PathBuf,
    pub stimulus_sets: Vec<StimulusSource>,
    /// Recording device; `None` runs without markers.
    pub backend: Option<DeviceBackend>,
    pub seed: Option<u64>,
    /// Marker CSV written alongside the recording.
    pub save_fn: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "Visual N170 modified".to_string(),
            duration_s: 120.0,
            n_trials: 2010,
            iti_s: 0.4,
            soa_s: 0.3,
            jitter_s: 0.2,
            stimulus_root: PathBuf::from("stimuli/SUMMER_SCHOOL"),
            stimulus_sets: vec![
                StimulusSource {
                    condition: Condition::House,
                    dir: PathBuf::from("houses"),
                    pattern: "*.3.jpg".to_string(),
                },
                StimulusSource {
                    condition: Condition::Face,
                    dir: PathBuf::from("mountains"),
                    pattern: "*_3.png".to_string(),
                },
            ],
            backend: None,
            seed: None,
            save_fn: None,
        }
    }
}

impl ExperimentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path.as_ref(), json)
            .with_context(|| format!("failed to write config file {}", path.as_ref().display()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.duration_s > 0.0) || Duration::try_from_secs_f64(self.duration_s).is_err() {
            bail!("duration must be a finite positive number of seconds, got {}", self.duration_s);
        }
        for (name, v) in [("iti", self.iti_s), ("soa", self.soa_s), ("jitter", self.jitter_s)] {
            if Duration::try_from_secs_f64(v).is_err() {
                bail!("{name} must be a finite non-negative number of seconds, got {v}");
            }
        }
        for c in Condition::ALL {
            if !self.stimulus_sets.iter().any(|s| s.condition == c) {
                bail!("no stimulus set configured for condition {c}");
            }
        }
        Ok(())
    }

    pub fn source_for(&self, condition: Condition) -> Option<&StimulusSource> {
        self.stimulus_sets.iter().find(|s| s.condition == condition)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_s)
    }

    pub fn iti(&self) -> Duration {
        Duration::from_secs_f64(self.iti_s)
    }

    pub fn soa(&self) -> Duration {
        Duration::from_secs_f64(self.soa_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_modified_n170_run() {
        let c = ExperimentConfig::default();
        assert_eq!(c.n_trials, 2010);
        assert_eq!(c.duration(), Duration::from_secs(120));
        assert_eq!(c.iti(), Duration::from_millis(400));
        assert_eq!(c.soa(), Duration::from_millis(300));
        assert_eq!(c.source_for(Condition::House).unwrap().pattern, "*.3.jpg");
        assert_eq!(c.source_for(Condition::Face).unwrap().pattern, "*_3.png");
        c.validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("n170.json");
        fs::write(&path, r#"{ "n_trials": 5, "backend": "muselsl" }"#).unwrap();
        let c = ExperimentConfig::load(&path).unwrap();
        assert_eq!(c.n_trials, 5);
        assert_eq!(c.backend, Some(DeviceBackend::MuseLsl));
        assert_eq!(c.soa_s, 0.3);
    }

    #[test]
    fn rejects_missing_condition() {
        let mut c = ExperimentConfig::default();
        c.stimulus_sets.retain(|s| s.condition == Condition::House);
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_durations() {
        for duration_s in [f64::INFINITY, f64::NAN, 1e30, 0.0] {
            let config = ExperimentConfig {
                duration_s,
                ..ExperimentConfig::default()
            };
            assert!(config.validate().is_err(), "accepted duration {duration_s}");
        }
        let config = ExperimentConfig {
            soa_s: f64::INFINITY,
            ..ExperimentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_jitter() {
        let c = ExperimentConfig {
            jitter_s: -0.1,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let c = ExperimentConfig {
            seed: Some(7),
            ..Default::default()
        };
        c.save(&path).unwrap();
        let back = ExperimentConfig::load(&path).unwrap();
        assert_eq!(back.seed, Some(7));
        assert_eq!(back.stimulus_sets, c.stimulus_sets);
    }
}
