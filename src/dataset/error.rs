use std::{
    fmt::{Display, Formatter, Result},
    path::PathBuf,
};

#[derive(Debug)]
pub(crate) enum DatasetError {
    Io(PathBuf, std::io::Error),
    Parse(serde_json::Error),
    Empty,
}

impl From<serde_json::Error> for DatasetError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl std::error::Error for DatasetError {}

impl Display for DatasetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DatasetError::Io(path, e) => {
                write!(f, "DatasetError: Unable to read {}: {e}", path.display())
            }
            DatasetError::Parse(e) => write!(f, "DatasetError: Parse: {e}"),
            DatasetError::Empty => write!(f, "DatasetError: Seed dataset contains no examples"),
        }
    }
}
