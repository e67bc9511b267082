// Command line arguments for the presenter and the analysis pipeline

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use n170_analysis::AnalysisConfig;
use n170_experiment::{DeviceBackend, ExperimentConfig};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(name = "visual-n170", version, about)]
pub struct N170Args {
    #[command(subcommand)]
    /// Run the face/house presentation or analyse a recorded session
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Flash house and face images while pushing one marker per trial
    Present(PresentArgs),

    /// Filter, epoch and average a recorded session, then fit its spectra
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PresentArgs {
    /// JSON experiment config; defaults are used when absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the per-condition stimulus folders
    #[arg(long)]
    pub stimulus_root: Option<PathBuf>,

    /// Block length in seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Upper bound on presented trials
    #[arg(short, long)]
    pub n_trials: Option<usize>,

    /// Recording backend that receives the markers (muselsl, brainflow, synthetic)
    #[arg(short, long)]
    pub backend: Option<DeviceBackend>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Marker file written by the outlet
    #[arg(long)]
    pub save_fn: Option<PathBuf>,

    /// Write the presented trials as JSON
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// Font for the instruction screen
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Run offscreen, without a window or keyboard
    #[arg(long)]
    pub headless: bool,

    #[arg(long, default_value_t = 1600)]
    pub width: u32,

    #[arg(long, default_value_t = 800)]
    pub height: u32,
}

impl PresentArgs {
    pub fn experiment_config(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::default(),
        };
        if let Some(root) = &self.stimulus_root {
            config.stimulus_root = root.clone();
        }
        if let Some(d) = self.duration {
            config.duration_s = d;
        }
        if let Some(n) = self.n_trials {
            config.n_trials = n;
        }
        if self.backend.is_some() {
            config.backend = self.backend;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(path) = &self.save_fn {
            config.save_fn = Some(path.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Args, Clone)]
pub struct AnalyzeArgs {
    /// JSON analysis config; defaults are used when absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Data cache root instead of ~/.eegnb/data
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub subject: Option<u32>,

    #[arg(long)]
    pub session: Option<u32>,

    /// Zip archive fetched when the example dataset is missing
    #[arg(long)]
    pub dataset_url: Option<String>,

    /// Figure output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub no_plots: bool,

    /// Seed for the bootstrap resampling
    #[arg(long)]
    pub seed: Option<u64>,
}

impl AnalyzeArgs {
    pub fn analysis_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir.clone();
        }
        if let Some(s) = self.subject {
            config.subject = s;
        }
        if let Some(s) = self.session {
            config.session = s;
        }
        if self.dataset_url.is_some() {
            config.dataset_url = self.dataset_url.clone();
        }
        if let Some(out) = &self.output {
            config.output_dir = out.clone();
        }
        config.skip_plots |= self.no_plots;
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> N170Args {
        N170Args::try_parse_from(argv).expect("arguments parse")
    }

    #[test]
    fn present_overrides_defaults() {
        let args = parse(&[
            "visual-n170",
            "present",
            "--duration",
            "5",
            "--backend",
            "muselsl",
            "--seed",
            "7",
        ]);
        let Command::Present(present) = args.command else {
            panic!("expected present");
        };
        let config = present.experiment_config().unwrap();
        assert_eq!(config.duration_s, 5.0);
        assert_eq!(config.backend, Some(DeviceBackend::MuseLsl));
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.n_trials, ExperimentConfig::default().n_trials);
        assert!(!present.headless);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(N170Args::try_parse_from(["visual-n170", "present", "--backend", "lsl2"]).is_err());
    }

    #[test]
    fn analyze_flags_reach_the_config() {
        let args = parse(&[
            "visual-n170",
            "analyze",
            "--data-dir",
            "/tmp/eeg",
            "--subject",
            "3",
            "--no-plots",
        ]);
        let Command::Analyze(analyze) = args.command else {
            panic!("expected analyze");
        };
        let config = analyze.analysis_config().unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/eeg")));
        assert_eq!(config.subject, 3);
        assert_eq!(config.session, 1);
        assert!(config.skip_plots);
    }
}
