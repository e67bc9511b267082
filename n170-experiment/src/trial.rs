use anyhow::{Result, anyhow};
use n170_core::Condition;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub condition: Condition,
}

/// Ordered trial sequence, consumed front to back by the runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialTable {
    trials: Vec<Trial>,
}

impl TrialTable {
    /// One unbiased coin flip per trial.
    pub fn generate<R: Rng + ?Sized>(n_trials: usize, rng: &mut R) -> Self {
        let trials = (0..n_trials)
            .map(|index| Trial {
                index,
                condition: if rng.random_bool(0.5) {
                    Condition::Face
                } else {
                    Condition::House
                },
            })
            .collect();
        Self { trials }
    }

    pub fn from_labels(labels: &[i32]) -> Result<Self> {
        let trials = labels
            .iter()
            .enumerate()
            .map(|(index, &label)| {
                Condition::from_label(label)
                    .map(|condition| Trial { index, condition })
                    .ok_or_else(|| anyhow!("trial {index}: unknown condition label {label}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { trials })
    }

    pub fn get(&self, idx: usize) -> Option<&Trial> {
        self.trials.get(idx)
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter()
    }
}
