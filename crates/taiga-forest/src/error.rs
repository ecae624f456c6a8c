use std::path::PathBuf;

/// Errors from forest training, walking, and model IO.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when n_tree is zero.
    #[error("n_tree must be at least 1, got {n_tree}")]
    InvalidTreeCount {
        /// The invalid n_tree value provided.
        n_tree: usize,
    },

    /// Returned when train_block is zero.
    #[error("train_block must be at least 1, got {train_block}")]
    InvalidTrainBlock {
        /// The invalid train_block value provided.
        train_block: usize,
    },

    /// Returned when min_node is zero.
    #[error("min_node must be at least 1, got {min_node}")]
    InvalidMinNode {
        /// The invalid min_node value provided.
        min_node: usize,
    },

    /// Returned when min_ratio is negative or not finite.
    #[error("min_ratio must be a finite value >= 0, got {min_ratio}")]
    InvalidMinRatio {
        /// The invalid min_ratio value provided.
        min_ratio: f64,
    },

    /// Returned when n_samp is zero or exceeds n_row for sampling without replacement.
    #[error("n_samp {n_samp} is invalid for {n_row} rows (replacement: {with_replacement})")]
    InvalidSampleCount {
        /// The invalid n_samp value provided.
        n_samp: usize,
        /// The number of rows in the dataset.
        n_row: usize,
        /// Whether sampling was with replacement.
        with_replacement: bool,
    },

    /// Returned when pred_fixed resolves outside [1, n_pred].
    #[error("pred_fixed {pred_fixed} must be in [1, {n_pred}]")]
    InvalidPredFixed {
        /// The invalid pred_fixed value provided.
        pred_fixed: usize,
        /// The number of predictors in the dataset.
        n_pred: usize,
    },

    /// Returned when pred_prob has the wrong length or an entry outside [0, 1].
    #[error("pred_prob must hold {n_pred} probabilities in [0, 1]")]
    InvalidPredProb {
        /// The number of predictors in the dataset.
        n_pred: usize,
    },

    /// Returned when the dataset has zero rows.
    #[error("dataset has zero rows")]
    EmptyDataset,

    /// Returned when the dataset has zero predictor columns.
    #[error("dataset has zero predictor columns")]
    ZeroPredictors,

    /// Returned when a predictor column has a different row count than expected.
    #[error("predictor column {pred} has {got} rows, expected {expected}")]
    ColumnLengthMismatch {
        /// The zero-based global predictor index of the offending column.
        pred: usize,
        /// The expected number of rows.
        expected: usize,
        /// The actual number of rows in the column.
        got: usize,
    },

    /// Returned when a numeric predictor value is NaN or infinite.
    #[error("non-finite value at row {row}, numeric predictor {pred}")]
    NonFiniteValue {
        /// The zero-based row index of the offending value.
        row: usize,
        /// The zero-based numeric predictor index.
        pred: usize,
    },

    /// Returned when a factor cardinality exceeds the session bound.
    #[error("factor predictor {pred} has cardinality {cardinality}, bound is {bound}")]
    CardinalityBound {
        /// The zero-based factor predictor index.
        pred: usize,
        /// The observed cardinality.
        cardinality: usize,
        /// The maximum admissible cardinality.
        bound: usize,
    },

    /// Returned when the response vector length differs from the row count.
    #[error("response has {got} values, expected {expected}")]
    ResponseLengthMismatch {
        /// The expected number of values (row count).
        expected: usize,
        /// The actual response length.
        got: usize,
    },

    /// Returned when ctg_width is zero for a classification response.
    #[error("classification requires ctg_width >= 1")]
    ZeroClasses,

    /// Returned when a category label is outside [0, ctg_width).
    #[error("category {got} at row {row} is outside [0, {ctg_width})")]
    CategoryOutOfRange {
        /// The zero-based row index of the offending label.
        row: usize,
        /// The offending category value.
        got: u32,
        /// The response cardinality.
        ctg_width: usize,
    },

    /// Returned when sample weights are combined with sampling without replacement.
    #[error("sample weights require sampling with replacement")]
    WeightedWithoutReplacement,

    /// Returned when sample weights have the wrong length or a negative entry.
    #[error("sample weights must hold {n_row} non-negative finite values")]
    InvalidSampleWeights {
        /// The number of rows in the dataset.
        n_row: usize,
    },

    /// Returned when a prediction batch does not match the forest's predictor shape.
    #[error("prediction batch has {got_num} numeric / {got_fac} factor columns, forest expects {expected_num} / {expected_fac}")]
    PredictionShapeMismatch {
        /// The numeric column count the forest was trained with.
        expected_num: usize,
        /// The factor column count the forest was trained with.
        expected_fac: usize,
        /// The numeric column count of the batch.
        got_num: usize,
        /// The factor column count of the batch.
        got_fac: usize,
    },

    /// Returned when a bag matrix does not match the forest and batch shapes.
    #[error("bag matrix covers {got_tree} trees x {got_row} rows, expected {expected_tree} x {expected_row}")]
    BagShapeMismatch {
        /// The tree count of the forest.
        expected_tree: usize,
        /// The row count of the batch.
        expected_row: usize,
        /// The tree count of the bag matrix.
        got_tree: usize,
        /// The row count of the bag matrix.
        got_row: usize,
    },

    /// Returned when a regression entry point is called on a classification forest,
    /// or vice versa.
    #[error("forest response kind mismatch: {detail}")]
    ResponseKindMismatch {
        /// Human-readable description of the mismatch.
        detail: String,
    },

    /// Returned when a structural invariant of the packed forest is violated.
    #[error("corrupt forest: {detail}")]
    CorruptForest {
        /// Human-readable description of the violated invariant.
        detail: String,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the model file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },
}
