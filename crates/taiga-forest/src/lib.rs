//! Random-forest training and prediction over mixed tabular data.
//!
//! Provides a packed-forest engine: trees grow on mutable pre-tree
//! scratchpads, are consumed into contiguous shared arrays, and are
//! walked in bulk with loops specialized by predictor mix. Supports
//! regression and multi-class classification, numeric and bounded-
//! cardinality factor predictors, out-of-bag evaluation, parallel
//! training and prediction via rayon, and model serialization.

mod bag;
mod builder;
mod error;
mod forest;
mod predict;
mod pretree;
mod sample;
mod serialize;
mod session;
mod splitsig;
mod splitter;
mod stage;
mod train;
mod walker;

pub use bag::{BagMap, RowBitset};
pub use error::ForestError;
pub use forest::Forest;
pub use predict::{ConfusionMatrix, CtgPrediction, RegPrediction};
pub use sample::Response;
pub use session::{MAX_FAC_CARD, PredictorTable, Session};
pub use train::{TrainConfig, TrainMetadata, TrainResult};
