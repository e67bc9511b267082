use anyhow::{Context, Result};
use log::info;
use n170_core::{StandardPhase, TrialRecord};
use n170_experiment::{
    CsvMarkerWriter, ExperimentConfig, ExperimentStateMachine, MarkerLog, MarkerOutlet, TrialTable,
    VisualN170, load_stimulus,
};
use n170_render::{ImageStimulus, SkiaDisplay};
use n170_timing::HighPrecisionTimer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;

pub type Presenter = VisualN170<ImageStimulus, Box<dyn MarkerOutlet>>;
pub type Runner = ExperimentStateMachine<StandardPhase, HighPrecisionTimer, StdRng>;

/// Everything one presentation block needs, ready to be driven by a window or
/// run offscreen.
pub struct Session {
    pub runner: Runner,
    pub presenter: Presenter,
}

impl Session {
    pub fn prepare(config: ExperimentConfig) -> Result<Self> {
        let stimuli = load_stimulus(&config.stimulus_root, &config.stimulus_sets, |p| {
            ImageStimulus::load(p)
        })?;
        let outlet = open_outlet(&config)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let trials = TrialTable::generate(config.n_trials, &mut rng);
        let runner = ExperimentStateMachine::new(config, trials, HighPrecisionTimer::new(), rng);
        Ok(Self {
            runner,
            presenter: VisualN170::new(stimuli, outlet),
        })
    }

    /// Instruction screen text for this block.
    pub fn instructions(&self) -> Vec<String> {
        vec![
            "Welcome to the VISUAL N170 experiment!".to_string(),
            String::new(),
            "Stay still, focus on the centre of the screen, and try not to blink.".to_string(),
            String::new(),
            format!(
                "This block will run for {:.0} seconds.",
                self.runner.config.duration_s
            ),
            String::new(),
            "Press spacebar to continue.".to_string(),
        ]
    }

    pub fn run_headless(&mut self, width: u32, height: u32) -> Result<()> {
        let mut display = SkiaDisplay::new(width, height)?;
        self.runner.run_blocking(&mut self.presenter, &mut display)?;
        let stats = display.flip_stats();
        info!(
            "{} flips, mean interval {:.3} ms, jitter {:.3} ms",
            display.frame_count(),
            stats.average_frame_time_ns / 1e6,
            stats.jitter_ns / 1e6
        );
        Ok(())
    }

    /// Flush the outlet and optionally write the trial records as JSON.
    pub fn finish(self, records_path: Option<&Path>) -> Result<Vec<TrialRecord>> {
        let aborted = self.runner.is_aborted();
        let records = self.runner.records;
        if let Some(mut outlet) = self.presenter.into_outlet() {
            outlet.flush()?;
            let sent = records.iter().filter(|r| r.marker.is_some()).count();
            info!("{sent} markers pushed to {}", outlet.backend().name());
        }
        if let Some(path) = records_path {
            let json = serde_json::to_string_pretty(&records)
                .context("failed to serialize trial records")?;
            fs::write(path, json)
                .with_context(|| format!("failed to write trial records {}", path.display()))?;
        }
        info!(
            "{} trials presented{}",
            records.len(),
            if aborted { " (aborted)" } else { "" }
        );
        Ok(records)
    }
}

fn open_outlet(config: &ExperimentConfig) -> Result<Option<Box<dyn MarkerOutlet>>> {
    let Some(backend) = config.backend else {
        return Ok(None);
    };
    let outlet: Box<dyn MarkerOutlet> = match &config.save_fn {
        Some(path) => {
            info!("writing {} markers to {}", backend.name(), path.display());
            Box::new(CsvMarkerWriter::create(path, backend)?)
        }
        None => Box::new(MarkerLog::new(backend)),
    };
    Ok(Some(outlet))
}
