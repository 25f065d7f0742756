use std::fmt::{Display, Formatter, Result};

#[derive(Debug)]
pub(crate) enum StoreError {
    /// No program exists under the requested version id.
    NotFound(i64),
    /// The id allocator handed out a duplicate version id. Must not happen
    /// with a serialized autoincrement allocator; fatal if it does. The
    /// colliding id is unknowable at the failure point, so none is carried.
    Conflict,
    Database(sqlx::Error),
    Serialization(serde_json::Error),
    CorruptRecord(i64),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl std::error::Error for StoreError {}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            StoreError::NotFound(id) => {
                write!(f, "StoreError: No program with version id {id}")
            }
            StoreError::Conflict => {
                write!(f, "StoreError: Version id collision")
            }
            StoreError::Database(e) => write!(f, "StoreError: Database: {e}"),
            StoreError::Serialization(e) => write!(f, "StoreError: Serialization: {e}"),
            StoreError::CorruptRecord(id) => {
                write!(f, "StoreError: Unreadable record for version id {id}")
            }
        }
    }
}
