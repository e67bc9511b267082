use anyhow::{Result, anyhow};
use n170_core::{Display, Marker, Stimulus, TrialRecord};
use n170_timing::Timer;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::device::MarkerOutlet;
use crate::stimuli::StimulusSet;
use crate::trial::Trial;

/// Presentation strategy injected into the trial runner.
pub trait TrialPresenter<D: Display> {
    fn present_stimulus<T: Timer, R: Rng + ?Sized>(
        &mut self,
        idx: usize,
        trial: &Trial,
        display: &mut D,
        timer: &T,
        rng: &mut R,
    ) -> Result<TrialRecord>;
}

/// Face/house RSVP: a random image of the trial's condition, one marker per onset.
pub struct VisualN170<S: Stimulus, O: MarkerOutlet> {
    stimuli: StimulusSet<S>,
    outlet: Option<O>,
}

impl<S: Stimulus, O: MarkerOutlet> VisualN170<S, O> {
    pub fn new(stimuli: StimulusSet<S>, outlet: Option<O>) -> Self {
        Self { stimuli, outlet }
    }

    pub fn stimuli(&self) -> &StimulusSet<S> {
        &self.stimuli
    }

    pub fn outlet(&self) -> Option<&O> {
        self.outlet.as_ref()
    }

    pub fn into_outlet(self) -> Option<O> {
        self.outlet
    }
}

impl<S, O, D> TrialPresenter<D> for VisualN170<S, O>
where
    S: Stimulus,
    O: MarkerOutlet,
    D: Display<Image = S>,
{
    fn present_stimulus<T: Timer, R: Rng + ?Sized>(
        &mut self,
        idx: usize,
        trial: &Trial,
        display: &mut D,
        timer: &T,
        rng: &mut R,
    ) -> Result<TrialRecord> {
        let condition = trial.condition;
        let image = self
            .stimuli
            .get(condition)
            .choose(rng)
            .ok_or_else(|| anyhow!("trial {idx}: no {condition} stimuli to draw from"))?;
        display.draw(image)?;

        let onset = timer.unix_time();
        let marker = match self.outlet.as_mut() {
            Some(outlet) => Some(outlet.push_sample(Marker::from(condition), onset)?),
            None => None,
        };

        display.flip()?;

        Ok(TrialRecord {
            trial_id: idx,
            condition,
            image: image.source().to_path_buf(),
            onset,
            marker,
        })
    }
}
