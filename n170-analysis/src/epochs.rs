use anyhow::{Result, bail};
use log::{debug, info, warn};
use n170_core::Condition;
use ndarray::{Array2, Array3, ArrayView1, Axis, s};
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::raw::RawRecording;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochParams {
    pub event_id: Vec<Condition>,
    pub tmin: f64,
    pub tmax: f64,
    /// Peak-to-peak limit in volts, any picked channel above it drops the epoch.
    pub reject_ptp: Option<f64>,
    pub picks: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    OutOfBounds,
    PeakToPeak { channel: String, ptp: f64 },
}

/// Fixed windows cut around events, `data` is `[n_epochs, n_channels, n_times]`.
#[derive(Debug, Clone)]
pub struct Epochs {
    pub sfreq: f64,
    pub ch_names: Vec<String>,
    pub data: Array3<f64>,
    pub events: Vec<Event>,
    pub conditions: Vec<Condition>,
    pub dropped: Vec<(Event, DropReason)>,
    /// Every event found in the recording, selected or not.
    pub n_source_events: usize,
    first_offset: i64,
}

fn peak_to_peak(x: ArrayView1<f64>) -> f64 {
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    hi - lo
}

impl Epochs {
    pub fn from_raw(raw: &RawRecording, events: &[Event], params: &EpochParams) -> Result<Self> {
        if let Some(&bad) = params.picks.iter().find(|&&p| p >= raw.n_channels()) {
            bail!("pick {bad} out of range for {} channels", raw.n_channels());
        }
        if params.tmin > params.tmax {
            bail!("tmin {} is after tmax {}", params.tmin, params.tmax);
        }
        let first = (params.tmin * raw.sfreq).round() as i64;
        let last = (params.tmax * raw.sfreq).round() as i64;
        let n_times = (last - first + 1) as usize;
        let n_samples = raw.n_times() as i64;
        let ch_names: Vec<String> = params.picks.iter().map(|&p| raw.ch_names[p].clone()).collect();

        let mut values = Vec::new();
        let mut kept = Vec::new();
        let mut conditions = Vec::new();
        let mut dropped = Vec::new();

        'events: for ev in events {
            let Some(condition) =
                Condition::from_label(ev.id).filter(|c| params.event_id.contains(c))
            else {
                continue;
            };
            let start = ev.sample as i64 + first;
            let stop = ev.sample as i64 + last;
            if start < 0 || stop >= n_samples {
                dropped.push((*ev, DropReason::OutOfBounds));
                continue;
            }
            let window = raw.data.slice(s![.., start as usize..=stop as usize]);
            if let Some(limit) = params.reject_ptp {
                for (name, &p) in ch_names.iter().zip(&params.picks) {
                    let ptp = peak_to_peak(window.row(p));
                    if ptp > limit {
                        dropped.push((
                            *ev,
                            DropReason::PeakToPeak {
                                channel: name.clone(),
                                ptp,
                            },
                        ));
                        continue 'events;
                    }
                }
            }
            for &p in &params.picks {
                values.extend(window.row(p).iter().copied());
            }
            kept.push(*ev);
            conditions.push(condition);
        }

        let data = Array3::from_shape_vec((kept.len(), params.picks.len(), n_times), values)?;
        debug!(
            "{} epochs of {} samples kept, {} dropped",
            kept.len(),
            n_times,
            dropped.len()
        );
        Ok(Self {
            sfreq: raw.sfreq,
            ch_names,
            data,
            events: kept,
            conditions,
            dropped,
            n_source_events: events.len(),
            first_offset: first,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn n_times(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn tmin(&self) -> f64 {
        self.first_offset as f64 / self.sfreq
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times())
            .map(|i| (self.first_offset + i as i64) as f64 / self.sfreq)
            .collect()
    }

    /// Share of all found events that did not end up as an epoch, in percent.
    pub fn drop_percentage(&self) -> f64 {
        if self.n_source_events == 0 {
            return 0.0;
        }
        (1.0 - self.len() as f64 / self.n_source_events as f64) * 100.0
    }

    /// Epochs of one condition, `[n, n_channels, n_times]`.
    pub fn select(&self, condition: Condition) -> Array3<f64> {
        let idx: Vec<usize> = self
            .conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == condition)
            .map(|(i, _)| i)
            .collect();
        self.data.select(Axis(0), &idx)
    }

    /// One average per condition, in `order`. Conditions without epochs are skipped.
    pub fn average_by_event_type(&self, order: &[Condition]) -> Vec<Evoked> {
        let mut out = Vec::new();
        for &condition in order {
            let picked = self.select(condition);
            let nave = picked.len_of(Axis(0));
            let Some(mean) = picked.mean_axis(Axis(0)) else {
                warn!("no epochs left for {condition}, skipping its average");
                continue;
            };
            info!("{condition}: averaged {nave} epochs");
            out.push(Evoked {
                condition,
                nave,
                sfreq: self.sfreq,
                tmin: self.tmin(),
                ch_names: self.ch_names.clone(),
                data: mean,
            });
        }
        out
    }
}

/// Average response of one condition, `data` is `[n_channels, n_times]`.
#[derive(Debug, Clone)]
pub struct Evoked {
    pub condition: Condition,
    pub nave: usize,
    pub sfreq: f64,
    pub tmin: f64,
    pub ch_names: Vec<String>,
    pub data: Array2<f64>,
}

impl Evoked {
    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times()).map(|i| self.tmin + i as f64 / self.sfreq).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn flat_raw(n: usize) -> RawRecording {
        let names = vec!["A".to_string(), "B".to_string()];
        RawRecording::new(100.0, names, Array2::zeros((2, n)), vec![0; n]).unwrap()
    }

    fn params() -> EpochParams {
        EpochParams {
            event_id: vec![Condition::House, Condition::Face],
            tmin: -0.1,
            tmax: 0.2,
            reject_ptp: Some(1.0),
            picks: vec![0, 1],
        }
    }

    #[test]
    fn window_includes_both_ends() {
        let raw = flat_raw(100);
        let ev = [Event { sample: 50, id: 1 }];
        let ep = Epochs::from_raw(&raw, &ev, &params()).unwrap();
        assert_eq!(ep.data.dim(), (1, 2, 31));
        let t = ep.times();
        approx::assert_abs_diff_eq!(t[0], -0.1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(t[30], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn windows_past_the_edges_are_dropped() {
        let raw = flat_raw(100);
        let ev = [
            Event { sample: 5, id: 1 },
            Event { sample: 50, id: 2 },
            Event { sample: 80, id: 1 },
            Event { sample: 79, id: 2 },
        ];
        let ep = Epochs::from_raw(&raw, &ev, &params()).unwrap();
        // 79 + 20 = 99 is the last sample, still inside
        assert_eq!(ep.events.iter().map(|e| e.sample).collect::<Vec<_>>(), vec![50, 79]);
        assert!(ep.dropped.iter().all(|(_, r)| *r == DropReason::OutOfBounds));
        approx::assert_abs_diff_eq!(ep.drop_percentage(), 50.0);
    }

    #[test]
    fn rejection_is_strictly_above_threshold() {
        let mut raw = flat_raw(200);
        raw.data[[1, 50]] = 1.0; // exactly at the limit
        raw.data[[1, 150]] = 1.5;
        let ev = [Event { sample: 50, id: 1 }, Event { sample: 150, id: 2 }];
        let ep = Epochs::from_raw(&raw, &ev, &params()).unwrap();
        assert_eq!(ep.len(), 1);
        assert_eq!(ep.conditions, vec![Condition::House]);
        match &ep.dropped[0].1 {
            DropReason::PeakToPeak { channel, ptp } => {
                assert_eq!(channel, "B");
                approx::assert_abs_diff_eq!(*ptp, 1.5);
            }
            other => panic!("unexpected drop reason {other:?}"),
        }
    }

    #[test]
    fn unselected_events_count_toward_the_total() {
        let raw = flat_raw(200);
        let ev = [Event { sample: 50, id: 1 }, Event { sample: 100, id: 7 }];
        let ep = Epochs::from_raw(&raw, &ev, &params()).unwrap();
        assert_eq!(ep.len(), 1);
        assert!(ep.dropped.is_empty());
        approx::assert_abs_diff_eq!(ep.drop_percentage(), 50.0);
    }

    #[test]
    fn averages_per_condition() {
        let mut raw = flat_raw(300);
        raw.data.row_mut(0).fill(0.0);
        for i in 40..=70 {
            raw.data[[0, i]] = 0.2;
        }
        let ev = [
            Event { sample: 50, id: 1 },
            Event { sample: 150, id: 1 },
            Event { sample: 250, id: 2 },
        ];
        let ep = Epochs::from_raw(&raw, &ev, &params()).unwrap();
        let evoked = ep.average_by_event_type(&[Condition::House, Condition::Face]);
        assert_eq!(evoked.len(), 2);
        assert_eq!(evoked[0].nave, 2);
        approx::assert_abs_diff_eq!(evoked[0].data[[0, 10]], 0.1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(evoked[1].data[[0, 10]], 0.0);
    }

    #[test]
    fn empty_condition_has_no_average() {
        let raw = flat_raw(200);
        let ep = Epochs::from_raw(&raw, &[Event { sample: 50, id: 2 }], &params()).unwrap();
        let evoked = ep.average_by_event_type(&[Condition::House, Condition::Face]);
        assert_eq!(evoked.len(), 1);
        assert_eq!(evoked[0].condition, Condition::Face);
    }

    #[test]
    fn bad_pick_is_an_error() {
        let raw = flat_raw(10);
        let p = EpochParams { picks: vec![0, 5], ..params() };
        assert!(Epochs::from_raw(&raw, &[], &p).is_err());
    }
}
