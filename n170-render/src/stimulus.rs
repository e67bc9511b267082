use anyhow::{Context, Result, anyhow};
use n170_cache::intern_path;
use n170_core::Stimulus;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_skia::{ColorU8, Pixmap};

/// Decoded image ready to be blitted: premultiplied RGBA.
#[derive(Debug, Clone)]
pub struct ImageStimulus {
    path: PathBuf,
    id: usize,
    pixmap: Arc<Pixmap>,
}

impl ImageStimulus {
    pub fn load(path: &Path) -> Result<Self> {
        let decoded = ::image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?
            .into_rgba8();
        let (w, h) = decoded.dimensions();
        Self::from_rgba(path, w, h, decoded.as_raw())
    }

    /// Build from straight (non-premultiplied) RGBA bytes.
    pub fn from_rgba(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<Self> {
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(anyhow!(
                "{}: expected {}x{} RGBA pixels, got {} bytes",
                path.display(),
                width,
                height,
                rgba.len()
            ));
        }
        let mut pixmap = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("{}: empty image", path.display()))?;
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.chunks_exact(4)) {
            *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
        }
        Ok(Self {
            path: path.to_path_buf(),
            id: intern_path(path),
            pixmap: Arc::new(pixmap),
        })
    }

    pub fn pixmap(&self) -> &Arc<Pixmap> {
        &self.pixmap
    }

    pub fn size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }
}

impl Stimulus for ImageStimulus {
    fn cache_id(&self) -> usize {
        self.id
    }

    fn source(&self) -> &Path {
        &self.path
    }
}
