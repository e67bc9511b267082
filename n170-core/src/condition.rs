use serde::{Deserialize, Serialize};
use std::fmt;

/// Experimental category attached to a trial and to its event marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    House,
    Face,
}

impl Condition {
    pub const ALL: [Condition; 2] = [Condition::House, Condition::Face];

    /// Event code written to the stim channel and used as marker value.
    pub fn label(&self) -> i32 {
        match self {
            Condition::House => 1,
            Condition::Face => 2,
        }
    }

    pub fn from_label(label: i32) -> Option<Self> {
        match label {
            1 => Some(Condition::House),
            2 => Some(Condition::Face),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Condition::House => "House",
            Condition::Face => "Face",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for c in Condition::ALL {
            assert_eq!(Condition::from_label(c.label()), Some(c));
        }
        assert_eq!(Condition::from_label(0), None);
        assert_eq!(Condition::from_label(3), None);
    }
}
