mod intern;

pub use intern::{Atom, intern_path, intern_text, interned_count, resolve};
