use std::fmt::{Display, Formatter, Result};

use crate::{feedback::FeedbackError, store::StoreError};

#[derive(Debug)]
pub(crate) enum OptimizeError {
    Store(StoreError),
    Feedback(FeedbackError),
}

impl From<StoreError> for OptimizeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<FeedbackError> for OptimizeError {
    fn from(value: FeedbackError) -> Self {
        Self::Feedback(value)
    }
}

impl std::error::Error for OptimizeError {}

impl Display for OptimizeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            OptimizeError::Store(e) => write!(f, "{e}"),
            OptimizeError::Feedback(e) => write!(f, "{e}"),
        }
    }
}
