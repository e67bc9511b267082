pub mod display;
pub mod stimulus;
pub mod text;

pub use display::SkiaDisplay;
pub use stimulus::ImageStimulus;
