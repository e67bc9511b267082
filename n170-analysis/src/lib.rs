pub mod bootstrap;
pub mod config;
pub mod dataset;
pub mod device;
pub mod epochs;
pub mod events;
pub mod filter;
pub mod fit;
pub mod pipeline;
pub mod plots;
pub mod psd;
pub mod raw;
pub mod spectral;

pub use bootstrap::{ConditionSummary, bootstrap_ci};
pub use config::{AnalysisConfig, SpectralSettings};
pub use dataset::{
    DatasetFetcher, HttpFetcher, ensure_dataset, extract_zip, session_dir, session_files,
};
pub use device::DeviceProfile;
pub use epochs::{EpochParams, Epochs, Evoked};
pub use events::{Event, find_events};
pub use filter::{BandPass, Biquad};
pub use pipeline::{AnalysisReport, analyze_raw, run};
pub use psd::{Psd, hamming_periodic, welch};
pub use raw::RawRecording;
pub use spectral::{AperiodicMode, PeakParams, SpectralModel};
