use crate::Stimulus;
use anyhow::Result;

/// Double-buffered drawing surface the presenter draws stimuli onto.
pub trait Display {
    type Image: Stimulus;

    /// Draw into the back buffer.
    fn draw(&mut self, image: &Self::Image) -> Result<()>;
    /// Reset the back buffer to the background colour.
    fn clear(&mut self);
    /// Make the back buffer visible.
    fn flip(&mut self) -> Result<()>;
}
