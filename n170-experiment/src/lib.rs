pub mod config;
pub mod device;
pub mod presenter;
pub mod state;
pub mod stimuli;
pub mod trial;

pub use config::{ExperimentConfig, StimulusSource};
pub use device::{CsvMarkerWriter, DeviceBackend, MarkerLog, MarkerOutlet};
pub use presenter::{TrialPresenter, VisualN170};
pub use state::{ExperimentEvent, ExperimentStateMachine};
pub use stimuli::{StimulusSet, load_stimulus, matches_pattern};
pub use trial::{Trial, TrialTable};
