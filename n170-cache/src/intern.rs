use lazy_static::lazy_static;
use std::path::Path;
use std::sync::RwLock;
pub use string_cache::DefaultAtom as Atom;

lazy_static! {
    static ref INTERNER: RwLock<Vec<Atom>> = RwLock::new(Vec::new());
}

/// Intern a string and return its stable id
pub fn intern_text(s: &str) -> usize {
    let atom = Atom::from(s);
    let mut v = INTERNER.write().unwrap_or_else(|e| e.into_inner());
    match v.iter().position(|a| *a == atom) {
        Some(idx) => idx,
        None => {
            v.push(atom);
            v.len() - 1
        }
    }
}

/// Intern a stimulus source path. Two loads of the same file share an id.
pub fn intern_path(path: &Path) -> usize {
    intern_text(&path.to_string_lossy())
}

/// Current count of unique entries
pub fn interned_count() -> usize {
    INTERNER.read().unwrap_or_else(|e| e.into_inner()).len()
}

pub fn resolve(id: usize) -> Option<String> {
    INTERNER
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(id)
        .map(|a| a.to_string())
}
