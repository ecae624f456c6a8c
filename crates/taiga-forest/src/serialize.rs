//! Model persistence via a versioned bincode envelope.
//!
//! The envelope carries the packed forest and, when trained with
//! bagging retained, the bag matrix needed for out-of-bag passes in a
//! later session. Loaded forests are validated before they are handed
//! back.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::bag::BagMap;
use crate::error::ForestError;
use crate::forest::Forest;

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

/// Versioned envelope for the serialized model.
#[derive(serde::Serialize, serde::Deserialize)]
struct ModelEnvelope {
    /// Format version for compatibility checking.
    format_version: u32,
    /// The packed forest.
    forest: Forest,
    /// The bag matrix, when retained for out-of-bag prediction.
    bag: Option<BagMap>,
}

impl Forest {
    /// Save the forest, and optionally its bag matrix, to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeModel`] | bincode encoding failed |
    /// | [`ForestError::WriteModel`] | file write failed |
    #[instrument(skip(self, bag), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>, bag: Option<&BagMap>) -> Result<(), ForestError> {
        let path = path.as_ref();

        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION,
            forest: self.clone(),
            bag: bag.cloned(),
        };

        let bytes =
            bincode::serialize(&envelope).map_err(|e| ForestError::SerializeModel { source: e })?;

        std::fs::write(path, &bytes).map_err(|e| ForestError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            size_bytes = bytes.len(),
            n_tree = self.n_tree(),
            forest_size = self.forest_size(),
            "model saved"
        );
        Ok(())
    }

    /// Load a forest, and its bag matrix if one was saved, from a binary
    /// file.
    ///
    /// Checks the format version and validates the packed structure, so
    /// a truncated or corrupted file never reaches the walker.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadModel`] | file read failed |
    /// | [`ForestError::DeserializeModel`] | bincode decoding failed |
    /// | [`ForestError::IncompatibleModelVersion`] | format version mismatch |
    /// | [`ForestError::CorruptForest`] | packed invariants violated |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, Option<BagMap>), ForestError> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|e| ForestError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        let envelope: ModelEnvelope =
            bincode::deserialize(&bytes).map_err(|e| ForestError::DeserializeModel {
                path: path.to_path_buf(),
                source: e,
            })?;

        if envelope.format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: envelope.format_version,
                path: path.to_path_buf(),
            });
        }
        envelope.forest.validate()?;

        debug!(
            n_tree = envelope.forest.n_tree(),
            forest_size = envelope.forest.forest_size(),
            bagged = envelope.bag.is_some(),
            "model loaded"
        );
        Ok((envelope.forest, envelope.bag))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::bag::BagMap;
    use crate::error::ForestError;
    use crate::forest::Forest;
    use crate::session::PredictorTable;

    fn small_forest() -> Forest {
        Forest::from_arrays(
            vec![0, 0, 0],
            vec![0.5, 1.0, 2.0],
            vec![1, 0, 0],
            vec![0],
            vec![0],
            vec![],
            1,
            0,
            0,
        )
    }

    #[test]
    fn round_trip_preserves_predictions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.bin");

        let forest = small_forest();
        let mut bag = BagMap::new(1, 2);
        bag.set(0, 1);
        forest.save(&path, Some(&bag)).unwrap();

        let (loaded, loaded_bag) = Forest::load(&path).unwrap();
        assert_eq!(loaded, forest);
        assert_eq!(loaded_bag.unwrap(), bag);

        let table =
            PredictorTable::from_columns(vec![vec![0.2, 0.8]], vec![]).unwrap();
        let orig = forest.predict_reg(&table).unwrap();
        let restored = loaded.predict_reg(&table).unwrap();
        assert_eq!(orig.predictions, restored.predictions);
    }

    #[test]
    fn load_nonexistent_file_error() {
        let err = Forest::load("/tmp/nonexistent_model_57a21f.bin").unwrap_err();
        assert!(matches!(err, ForestError::ReadModel { .. }));
    }

    #[test]
    fn load_garbage_file_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"not a model").unwrap();
        let err = Forest::load(&path).unwrap_err();
        assert!(matches!(err, ForestError::DeserializeModel { .. }));
    }

    #[test]
    fn corrupt_forest_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.bin");

        let mut forest = small_forest();
        forest.bump[0] = 1000;
        forest.save(&path, None).unwrap();

        let err = Forest::load(&path).unwrap_err();
        assert!(matches!(err, ForestError::CorruptForest { .. }));
    }
}
