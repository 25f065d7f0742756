use std::fmt::Display;

/// Which of the two configured backends a completion is routed to. The
/// teacher proposes candidate prompts, the student executes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModelRole {
    Teacher,
    Student,
}

impl Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRole::Teacher => write!(f, "teacher"),
            ModelRole::Student => write!(f, "student"),
        }
    }
}
