/// Defines experiment phases and behavior
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    fn next(&self) -> Option<Self>;

    fn is_instructions(&self) -> bool {
        false
    }
    fn is_running(&self) -> bool {
        false
    }
    fn is_complete(&self) -> bool {
        false
    }
}

#[derive(Copy, Debug, Clone, PartialEq, Default)]
pub enum StandardPhase {
    #[default]
    Instructions,
    Running,
    Complete,
}

impl Phase for StandardPhase {
    fn next(&self) -> Option<Self> {
        use StandardPhase::*;
        Some(match self {
            Instructions => Running,
            Running => Complete,
            Complete => return None,
        })
    }

    fn is_instructions(&self) -> bool {
        matches!(self, StandardPhase::Instructions)
    }

    fn is_running(&self) -> bool {
        matches!(self, StandardPhase::Running)
    }

    fn is_complete(&self) -> bool {
        matches!(self, StandardPhase::Complete)
    }
}
