use log::debug;
use serde::{Deserialize, Serialize};

/// Onset of a stim-channel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sample: usize,
    pub id: i32,
}

/// Onsets in a stim channel: every sample where the code changes to a non-zero
/// value coming up from zero or from a smaller code. Held values and
/// decreasing steps are not new events. A code already present at the first
/// sample has no onset inside the recording and is skipped.
pub fn find_events(stim: &[i32]) -> Vec<Event> {
    let mut events = Vec::new();
    let Some(&first) = stim.first() else {
        return events;
    };
    let mut prev = first;
    for (sample, &code) in stim.iter().enumerate().skip(1) {
        if code != 0 && code != prev && (prev == 0 || code > prev) {
            events.push(Event { sample, id: code });
        }
        prev = code;
    }
    debug!("found {} events in {} stim samples", events.len(), stim.len());
    events
}
