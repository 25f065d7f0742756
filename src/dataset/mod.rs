mod error;

use std::path::Path;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

pub(crate) use error::DatasetError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LabeledExample {
    pub(crate) text: String,
    pub(crate) label: String,
}

/// Training and validation pools drawn from the seed dataset. The split is a
/// seeded shuffle followed by slicing, so a (seed, sizes) pair always yields
/// the same pools.
#[derive(Debug, Clone)]
pub(crate) struct Pools {
    pub(crate) train: Vec<LabeledExample>,
    pub(crate) validation: Vec<LabeledExample>,
}

impl Pools {
    pub(crate) fn split(
        mut examples: Vec<LabeledExample>,
        train_size: usize,
        validation_size: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        examples.shuffle(&mut rng);

        let train_size = train_size.min(examples.len());
        let mut validation = examples.split_off(train_size);
        validation.truncate(validation_size);

        Pools {
            train: examples,
            validation,
        }
    }
}

pub(crate) fn load_examples(path: &Path) -> Result<Vec<LabeledExample>, DatasetError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| DatasetError::Io(path.to_path_buf(), e))?;
    let examples = serde_json::from_str::<Vec<LabeledExample>>(&raw)?;
    if examples.is_empty() {
        return Err(DatasetError::Empty);
    }
    Ok(examples)
}

/// The known label inventory, sorted and deduplicated. The evaluator's strict
/// parse rule only accepts these tokens.
pub(crate) fn label_inventory(examples: &[LabeledExample]) -> Vec<String> {
    let mut labels = examples
        .iter()
        .map(|e| e.label.clone())
        .collect::<Vec<_>>();
    labels.sort();
    labels.dedup();
    labels
}
