use n170_cache::intern_path;
use std::path::{Path, PathBuf};

/// Drawable stimulus resource
pub trait Stimulus: Clone + std::fmt::Debug {
    fn cache_id(&self) -> usize;
    fn source(&self) -> &Path;
}

/// A stimulus that is only known by its file; used where pixels are not needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSource {
    pub path: PathBuf,
    id: usize,
}

impl ImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = intern_path(&path);
        Self { path, id }
    }
}

impl Stimulus for ImageSource {
    fn cache_id(&self) -> usize {
        self.id
    }

    fn source(&self) -> &Path {
        &self.path
    }
}
