pub mod condition;
pub mod display;
pub mod marker;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use condition::Condition;
pub use display::Display;
pub use marker::{Marker, MarkerSample};
pub use phase::{Phase, StandardPhase};
pub use stimulus::{ImageSource, Stimulus};
pub use trial::{TrialRecord, TrialState};
