use super::config::ExperimentConfig;
use super::presenter::TrialPresenter;
use super::trial::TrialTable;
use anyhow::Result;
use log::{debug, info, warn};
use n170_core::{Display, Phase, TrialRecord, TrialState};
use n170_timing::Timer;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentEvent {
    SpacePressed,
    EscapePressed,
}

#[derive(Debug, Clone)]
struct ScheduledTrial {
    index: usize,
    state: TrialState,
    /// Interval: onset deadline. Stimulus: offset deadline.
    deadline_ns: u64,
}

/// Drives the trial loop: blank interval, stimulus onset, hold for the soa, repeat.
///
/// The presentation itself is delegated to a [`TrialPresenter`]; the machine only
/// owns pacing and bookkeeping, so it can be ticked from a window's redraw loop or
/// run to completion with [`ExperimentStateMachine::run_blocking`].
pub struct ExperimentStateMachine<P, T, R>
where
    P: Phase,
    T: Timer,
    R: Rng,
{
    pub phase: P,
    pub timer: T,
    pub rng: R,
    pub config: ExperimentConfig,
    pub trials: TrialTable,
    current: Option<ScheduledTrial>,
    pub trial_number: usize,
    pub records: Vec<TrialRecord>,
    run_start_ns: Option<u64>,
    aborted: bool,
}

impl<P, T, R> ExperimentStateMachine<P, T, R>
where
    P: Phase,
    T: Timer,
    R: Rng,
{
    pub fn new(config: ExperimentConfig, trials: TrialTable, timer: T, rng: R) -> Self {
        Self {
            phase: P::default(),
            timer,
            rng,
            config,
            trials,
            current: None,
            trial_number: 0,
            records: Vec::new(),
            run_start_ns: None,
            aborted: false,
        }
    }

    pub fn advance_phase(&mut self) -> bool {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            true
        } else {
            false
        }
    }

    pub fn handle_event(&mut self, event: ExperimentEvent) -> bool {
        match (&self.phase, &event) {
            (phase, ExperimentEvent::SpacePressed) if phase.is_instructions() => {
                if !self.advance_phase() {
                    return false;
                }
                let now = self.timer.now();
                self.run_start_ns = Some(now);
                info!(
                    "{}: starting {} trials (limit {:.0} s)",
                    self.config.name,
                    self.target_trials(),
                    self.config.duration_s
                );
                self.schedule_trial(0, now);
                true
            }
            (phase, ExperimentEvent::EscapePressed) if !phase.is_complete() => {
                warn!("run aborted after {} trials", self.records.len());
                self.aborted = true;
                self.finish();
                true
            }
            _ => false,
        }
    }

    fn target_trials(&self) -> usize {
        self.config.n_trials.min(self.trials.len())
    }

    fn schedule_trial(&mut self, index: usize, from_ns: u64) {
        if index >= self.target_trials() {
            self.finish();
            return;
        }
        let jitter = if self.config.jitter_s > 0.0 {
            self.rng.random_range(0.0..self.config.jitter_s)
        } else {
            0.0
        };
        let wait = self.config.iti() + Duration::from_secs_f64(jitter);
        self.current = Some(ScheduledTrial {
            index,
            state: TrialState::Interval,
            deadline_ns: from_ns + wait.as_nanos() as u64,
        });
    }

    fn finish(&mut self) {
        self.current = None;
        while !self.phase.is_complete() {
            if !self.advance_phase() {
                break;
            }
        }
    }

    fn duration_elapsed(&self, now: u64) -> bool {
        self.run_start_ns
            .is_some_and(|start| {
                now.saturating_sub(start) >= self.config.duration().as_nanos() as u64
            })
    }

    /// Advance the machine to `timer.now()`. Returns `false` once the run is over.
    pub fn tick<D, Pr>(&mut self, presenter: &mut Pr, display: &mut D) -> Result<bool>
    where
        D: Display,
        Pr: TrialPresenter<D>,
    {
        if !self.phase.is_running() {
            return Ok(!self.phase.is_complete());
        }

        let now = self.timer.now();
        if self.duration_elapsed(now) {
            info!("duration elapsed after {} trials", self.records.len());
            display.clear();
            display.flip()?;
            self.finish();
            return Ok(false);
        }

        let Some((index, state, deadline)) = self
            .current
            .as_ref()
            .map(|t| (t.index, t.state.clone(), t.deadline_ns))
        else {
            self.finish();
            return Ok(false);
        };
        if now < deadline {
            return Ok(true);
        }

        match state {
            TrialState::Interval => {
                let Some(trial) = self.trials.get(index) else {
                    self.finish();
                    return Ok(false);
                };
                let record =
                    presenter.present_stimulus(index, trial, display, &self.timer, &mut self.rng)?;
                debug!(
                    "trial {} {} onset {:.6} ({})",
                    index,
                    record.condition,
                    record.onset,
                    record.image.display()
                );
                self.records.push(record);
                let onset = self.timer.now();
                self.current = Some(ScheduledTrial {
                    index,
                    state: TrialState::Stimulus,
                    deadline_ns: onset + self.config.soa().as_nanos() as u64,
                });
            }
            TrialState::Stimulus => {
                display.clear();
                display.flip()?;
                self.trial_number += 1;
                self.schedule_trial(index + 1, now);
            }
            TrialState::Complete => self.finish(),
        }
        Ok(self.phase.is_running())
    }

    /// Next instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        self.current.as_ref().map(|t| t.deadline_ns)
    }

    /// Start (if still on the instruction screen) and run every trial, sleeping
    /// on the timer between deadlines.
    pub fn run_blocking<D, Pr>(
        &mut self,
        presenter: &mut Pr,
        display: &mut D,
    ) -> Result<&[TrialRecord]>
    where
        D: Display,
        Pr: TrialPresenter<D>,
    {
        if self.phase.is_instructions() {
            self.handle_event(ExperimentEvent::SpacePressed);
        }
        while self.tick(presenter, display)? {
            let now = self.timer.now();
            let mut wake = self.next_deadline().unwrap_or(now);
            if let Some(start) = self.run_start_ns {
                wake = wake.min(start + self.config.duration().as_nanos() as u64);
            }
            if wake > now {
                self.timer.sleep(Duration::from_nanos(wake - now));
            }
        }
        Ok(&self.records)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Returns current phase
    pub fn current_phase(&self) -> &P {
        &self.phase
    }

    /// Experiment results
    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }
}
