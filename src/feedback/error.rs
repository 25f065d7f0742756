use std::fmt::{Display, Formatter, Result};

#[derive(Debug)]
pub(crate) enum FeedbackError {
    Database(sqlx::Error),
    CorruptRecord(i64),
}

impl From<sqlx::Error> for FeedbackError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value)
    }
}

impl std::error::Error for FeedbackError {}

impl Display for FeedbackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            FeedbackError::Database(e) => write!(f, "FeedbackError: Database: {e}"),
            FeedbackError::CorruptRecord(id) => {
                write!(f, "FeedbackError: Unreadable record {id}")
            }
        }
    }
}
