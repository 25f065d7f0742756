mod error;
mod sqlite;

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) use error::StoreError;
pub(crate) use sqlite::ProgramStore;

/// Instruction used for version 1 when a store is empty.
pub(crate) const BASE_INSTRUCTION: &str =
    "Given the fields `text`, produce the fields `label`.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Provenance {
    /// Taken from the labeled seed pool as-is.
    Seed,
    /// Retained because the current program already classified it correctly,
    /// paired with the model's own reasoning.
    Bootstrapped,
    /// Derived from a user correction.
    Feedback,
}

impl Display for Provenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Seed => write!(f, "seed"),
            Provenance::Bootstrapped => write!(f, "bootstrapped"),
            Provenance::Feedback => write!(f, "feedback"),
        }
    }
}

/// One labeled example embedded by value into a program. Snapshot semantics:
/// later changes to the source pool never reach an existing program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Demonstration {
    pub(crate) input: String,
    pub(crate) label: String,
    pub(crate) provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reasoning: Option<String>,
}

/// An immutable (instruction, demonstrations) configuration plus version
/// metadata. Identical content may exist under multiple version ids; a
/// given id's content never changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Program {
    pub(crate) id: i64,
    pub(crate) parent_id: Option<i64>,
    pub(crate) instruction: String,
    pub(crate) demonstrations: Vec<Demonstration>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) score: Option<f64>,
}
