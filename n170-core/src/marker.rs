use crate::Condition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event marker pushed to the recording device at stimulus onset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub label: i32,
}

impl Marker {
    pub fn new(label: i32) -> Self {
        Self { label }
    }
}

impl From<Condition> for Marker {
    fn from(c: Condition) -> Self {
        Self { label: c.label() }
    }
}

/// Wire form of a marker as a device backend expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerSample {
    Label(i32),
    Sequence(Vec<i32>),
}

impl MarkerSample {
    /// The label carried by the sample regardless of its wrapping.
    pub fn label(&self) -> Option<i32> {
        match self {
            MarkerSample::Label(l) => Some(*l),
            MarkerSample::Sequence(v) => v.first().copied(),
        }
    }
}

impl fmt::Display for MarkerSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerSample::Label(l) => write!(f, "{l}"),
            MarkerSample::Sequence(v) => {
                let items: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(MarkerSample::Label(2).to_string(), "2");
        assert_eq!(MarkerSample::Sequence(vec![1]).to_string(), "[1]");
        assert_eq!(MarkerSample::Sequence(vec![1]).label(), Some(1));
        assert_eq!(Marker::from(Condition::Face).label, 2);
    }
}
