use crate::{Condition, MarkerSample};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Trial state machine events
#[derive(Debug, Clone, PartialEq)]
pub enum TrialState {
    /// Blank screen between stimuli (iti + jitter)
    Interval,
    /// Image on screen for the stimulus-onset asynchrony
    Stimulus,
    Complete,
}

/// Recorded result per presented trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: usize,
    pub condition: Condition,
    pub image: PathBuf,
    /// Wall-clock onset in seconds since the unix epoch
    pub onset: f64,
    pub marker: Option<MarkerSample>,
}
