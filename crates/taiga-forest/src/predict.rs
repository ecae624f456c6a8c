//! Prediction entry points and aggregation.
//!
//! Regression averages leaf scores over the trees that saw the row;
//! classification takes a per-row census of leaf categories and votes.
//! Under the bag policy a row's in-bag trees are skipped, which makes
//! the aggregate an honest out-of-bag estimate; a row seen by no tree
//! is a documented degenerate reported through `rows_unseen` and a
//! sentinel output rather than an error.

use tracing::{instrument, warn};

use crate::bag::BagMap;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::session::PredictorTable;
use crate::walker::{self, LEAF_SKIPPED};

/// Vote outcomes cross-tabulated against the held response.
///
/// Rows index the true category, columns the voted one, so
/// `as_rows()[t][p]` is the number of evaluated rows of true category
/// `t` that the forest voted `p`; the diagonal holds the hits.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    ctg_width: usize,
}

impl ConfusionMatrix {
    fn new(ctg_width: usize) -> Self {
        Self {
            matrix: vec![vec![0; ctg_width]; ctg_width],
            ctg_width,
        }
    }

    fn record(&mut self, true_ctg: usize, predicted: usize) {
        self.matrix[true_ctg][predicted] += 1;
    }

    /// Fraction of evaluated rows whose vote landed on the diagonal.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let mut hits = 0usize;
        let mut evaluated = 0usize;
        for (true_ctg, row) in self.matrix.iter().enumerate() {
            for (predicted, &count) in row.iter().enumerate() {
                evaluated += count;
                if predicted == true_ctg {
                    hits += count;
                }
            }
        }
        if evaluated == 0 {
            return 0.0;
        }
        hits as f64 / evaluated as f64
    }

    /// Per-class error: the off-diagonal share of each true-class row.
    ///
    /// A class with no evaluated rows reports an error of zero.
    #[must_use]
    pub fn class_errors(&self) -> Vec<f64> {
        (0..self.ctg_width)
            .map(|true_ctg| {
                let row = &self.matrix[true_ctg];
                let total: usize = row.iter().sum();
                if total == 0 {
                    0.0
                } else {
                    let wrong = total - row[true_ctg];
                    wrong as f64 / total as f64
                }
            })
            .collect()
    }

    /// Return the underlying matrix rows.
    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Return the number of classes.
    #[must_use]
    pub fn ctg_width(&self) -> usize {
        self.ctg_width
    }
}

/// Result of a regression prediction pass.
#[derive(Debug, Clone)]
pub struct RegPrediction {
    /// Per-row mean leaf score; NaN where no tree saw the row.
    pub predictions: Vec<f64>,
    /// Mean squared error against the held response, bag mode only.
    /// The divisor is the full row count, including unseen rows.
    pub mse: Option<f64>,
    /// Rows evaluated by no tree.
    pub rows_unseen: Vec<usize>,
    leaves: Vec<i32>,
    n_tree: usize,
}

impl RegPrediction {
    /// Per-tree leaf offsets for a row, [`-1`] where the tree was
    /// skipped. This is the hand-off quantile estimation consumes.
    #[must_use]
    pub fn leaves_for_row(&self, row: usize) -> &[i32] {
        &self.leaves[row * self.n_tree..(row + 1) * self.n_tree]
    }
}

/// Result of a classification prediction pass.
#[derive(Debug, Clone)]
pub struct CtgPrediction {
    /// Per-row voted category; zero (with the row listed unseen) where
    /// no tree saw the row.
    pub predictions: Vec<u32>,
    /// Per-row category census, row-major with `ctg_width` stride.
    pub census: Vec<u32>,
    /// Confusion against the held response, bag mode only.
    pub confusion: Option<ConfusionMatrix>,
    /// Per-class errors from the confusion matrix, bag mode only.
    pub class_errors: Option<Vec<f64>>,
    /// Rows evaluated by no tree.
    pub rows_unseen: Vec<usize>,
    /// The response cardinality the census is strided by.
    pub ctg_width: usize,
}

fn check_shapes(
    forest: &Forest,
    table: &PredictorTable,
    bag: Option<&BagMap>,
) -> Result<(), ForestError> {
    forest.validate()?;
    if table.n_pred_num() != forest.n_pred_num() || table.n_pred_fac() != forest.n_pred_fac() {
        return Err(ForestError::PredictionShapeMismatch {
            expected_num: forest.n_pred_num(),
            expected_fac: forest.n_pred_fac(),
            got_num: table.n_pred_num(),
            got_fac: table.n_pred_fac(),
        });
    }
    if let Some(bag) = bag
        && (bag.n_tree() != forest.n_tree() || bag.n_row() != table.n_row())
    {
        return Err(ForestError::BagShapeMismatch {
            expected_tree: forest.n_tree(),
            expected_row: table.n_row(),
            got_tree: bag.n_tree(),
            got_row: bag.n_row(),
        });
    }
    Ok(())
}

fn check_response_len(expected: usize, got: usize) -> Result<(), ForestError> {
    if expected != got {
        return Err(ForestError::ResponseLengthMismatch { expected, got });
    }
    Ok(())
}

impl Forest {
    fn reg_pass(
        &self,
        table: &PredictorTable,
        bag: Option<&BagMap>,
    ) -> (Vec<f64>, Vec<usize>, Vec<i32>) {
        let n_row = table.n_row();
        let n_tree = self.n_tree();
        let leaves = walker::predict_leaves(self, table, bag);

        let mut predictions = Vec::with_capacity(n_row);
        let mut rows_unseen = Vec::new();
        for row in 0..n_row {
            let mut score = 0.0;
            let mut trees_seen = 0u32;
            for (tree, &leaf) in leaves[row * n_tree..(row + 1) * n_tree].iter().enumerate() {
                if leaf == LEAF_SKIPPED {
                    continue;
                }
                trees_seen += 1;
                score += self.num[self.tree_origin(tree) + leaf as usize];
            }
            if trees_seen == 0 {
                warn!(row, "no out-of-bag tree for row");
                rows_unseen.push(row);
                predictions.push(f64::NAN);
            } else {
                predictions.push(score / f64::from(trees_seen));
            }
        }
        (predictions, rows_unseen, leaves)
    }

    /// Predict a continuous response for every row of the batch.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::CorruptForest`] | packed invariants violated |
    /// | [`ForestError::PredictionShapeMismatch`] | batch shape differs from training |
    /// | [`ForestError::ResponseKindMismatch`] | called on a classification forest |
    #[instrument(skip_all, fields(n_row = table.n_row(), n_tree = self.n_tree()))]
    pub fn predict_reg(&self, table: &PredictorTable) -> Result<RegPrediction, ForestError> {
        if self.ctg_width() != 0 {
            return Err(ForestError::ResponseKindMismatch {
                detail: "regression prediction on a classification forest".to_string(),
            });
        }
        check_shapes(self, table, None)?;
        let (predictions, rows_unseen, leaves) = self.reg_pass(table, None);
        Ok(RegPrediction {
            predictions,
            mse: None,
            rows_unseen,
            leaves,
            n_tree: self.n_tree(),
        })
    }

    /// Out-of-bag regression prediction against the training response.
    ///
    /// Each row is averaged only over trees whose bag excludes it. The
    /// reported MSE keeps the full row count as divisor; rows seen by no
    /// tree are excluded from the error sum and surfaced in
    /// `rows_unseen` so the caller can pick its own policy.
    ///
    /// # Errors
    ///
    /// As [`Forest::predict_reg`], plus
    /// [`ForestError::BagShapeMismatch`] and
    /// [`ForestError::ResponseLengthMismatch`].
    #[instrument(skip_all, fields(n_row = table.n_row(), n_tree = self.n_tree()))]
    pub fn predict_reg_oob(
        &self,
        table: &PredictorTable,
        bag: &BagMap,
        y: &[f64],
    ) -> Result<RegPrediction, ForestError> {
        if self.ctg_width() != 0 {
            return Err(ForestError::ResponseKindMismatch {
                detail: "regression prediction on a classification forest".to_string(),
            });
        }
        check_shapes(self, table, Some(bag))?;
        check_response_len(table.n_row(), y.len())?;

        let (predictions, rows_unseen, leaves) = self.reg_pass(table, Some(bag));
        let mut sse = 0.0;
        for (row, &prediction) in predictions.iter().enumerate() {
            if prediction.is_nan() {
                continue;
            }
            let residual = prediction - y[row];
            sse += residual * residual;
        }
        Ok(RegPrediction {
            mse: Some(sse / table.n_row() as f64),
            predictions,
            rows_unseen,
            leaves,
            n_tree: self.n_tree(),
        })
    }

    fn ctg_pass(
        &self,
        table: &PredictorTable,
        bag: Option<&BagMap>,
    ) -> (Vec<u32>, Vec<u32>, Vec<usize>) {
        let ctg_width = self.ctg_width();
        let census = walker::predict_census(self, table, bag);

        let mut predictions = Vec::with_capacity(table.n_row());
        let mut rows_unseen = Vec::new();
        for row in 0..table.n_row() {
            let row_census = &census[row * ctg_width..(row + 1) * ctg_width];
            let mut arg_max = -1i64;
            let mut pop_max = 0u32;
            for (ctg, &pop) in row_census.iter().enumerate() {
                if pop > pop_max {
                    pop_max = pop;
                    arg_max = ctg as i64;
                }
            }
            if arg_max < 0 {
                warn!(row, "no out-of-bag tree for row");
                rows_unseen.push(row);
                predictions.push(0);
            } else {
                predictions.push(arg_max as u32);
            }
        }
        (predictions, census, rows_unseen)
    }

    /// Predict a category for every row of the batch.
    ///
    /// Votes break ties toward the lowest category index.
    ///
    /// # Errors
    ///
    /// As [`Forest::predict_reg`], with the kind check inverted.
    #[instrument(skip_all, fields(n_row = table.n_row(), n_tree = self.n_tree()))]
    pub fn predict_ctg(&self, table: &PredictorTable) -> Result<CtgPrediction, ForestError> {
        if self.ctg_width() == 0 {
            return Err(ForestError::ResponseKindMismatch {
                detail: "classification prediction on a regression forest".to_string(),
            });
        }
        check_shapes(self, table, None)?;
        let (predictions, census, rows_unseen) = self.ctg_pass(table, None);
        Ok(CtgPrediction {
            predictions,
            census,
            confusion: None,
            class_errors: None,
            rows_unseen,
            ctg_width: self.ctg_width(),
        })
    }

    /// Out-of-bag classification prediction against the training labels,
    /// with confusion matrix and per-class errors.
    ///
    /// # Errors
    ///
    /// As [`Forest::predict_ctg`], plus
    /// [`ForestError::BagShapeMismatch`],
    /// [`ForestError::ResponseLengthMismatch`] and
    /// [`ForestError::CategoryOutOfRange`].
    #[instrument(skip_all, fields(n_row = table.n_row(), n_tree = self.n_tree()))]
    pub fn predict_ctg_oob(
        &self,
        table: &PredictorTable,
        bag: &BagMap,
        y_ctg: &[u32],
    ) -> Result<CtgPrediction, ForestError> {
        if self.ctg_width() == 0 {
            return Err(ForestError::ResponseKindMismatch {
                detail: "classification prediction on a regression forest".to_string(),
            });
        }
        check_shapes(self, table, Some(bag))?;
        check_response_len(table.n_row(), y_ctg.len())?;
        let ctg_width = self.ctg_width();
        for (row, &ctg) in y_ctg.iter().enumerate() {
            if ctg as usize >= ctg_width {
                return Err(ForestError::CategoryOutOfRange {
                    row,
                    got: ctg,
                    ctg_width,
                });
            }
        }

        let (predictions, census, rows_unseen) = self.ctg_pass(table, Some(bag));
        let mut confusion = ConfusionMatrix::new(ctg_width);
        let mut unseen = rows_unseen.iter().copied().peekable();
        for (row, &predicted) in predictions.iter().enumerate() {
            if unseen.peek() == Some(&row) {
                unseen.next();
                continue;
            }
            confusion.record(y_ctg[row] as usize, predicted as usize);
        }
        let class_errors = confusion.class_errors();
        Ok(CtgPrediction {
            predictions,
            census,
            confusion: Some(confusion),
            class_errors: Some(class_errors),
            rows_unseen,
            ctg_width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ConfusionMatrix;
    use crate::bag::BagMap;
    use crate::error::ForestError;
    use crate::forest::Forest;
    use crate::session::PredictorTable;

    /// One numeric predictor, split at 0.5; leaves score 10 and 20.
    fn reg_forest(n_tree: usize) -> Forest {
        let mut pred = Vec::new();
        let mut num = Vec::new();
        let mut bump = Vec::new();
        let mut origin = Vec::new();
        for tree in 0..n_tree {
            origin.push((tree * 3) as i32);
            pred.extend_from_slice(&[0, 0, 0]);
            num.extend_from_slice(&[0.5, 10.0, 20.0]);
            bump.extend_from_slice(&[1, 0, 0]);
        }
        Forest::from_arrays(
            pred,
            num,
            bump,
            origin,
            vec![0; n_tree],
            vec![],
            1,
            0,
            0,
        )
    }

    /// Like `reg_forest` but terminals carry categories 1 and 0.
    fn ctg_forest(n_tree: usize) -> Forest {
        let mut forest = reg_forest(n_tree);
        for tree in 0..n_tree {
            forest.num[tree * 3 + 1] = 1.0;
            forest.num[tree * 3 + 2] = 0.0;
        }
        forest.ctg_width = 2;
        forest
    }

    #[test]
    fn regression_mean_over_trees() {
        let forest = reg_forest(3);
        let table =
            PredictorTable::from_columns(vec![vec![0.2, 0.9]], vec![]).unwrap();
        let out = forest.predict_reg(&table).unwrap();
        assert_eq!(out.predictions, vec![10.0, 20.0]);
        assert!(out.rows_unseen.is_empty());
        assert_eq!(out.leaves_for_row(0), &[1, 1, 1]);
    }

    #[test]
    fn oob_skips_in_bag_trees() {
        let forest = reg_forest(2);
        let table =
            PredictorTable::from_columns(vec![vec![0.2, 0.2, 0.9]], vec![]).unwrap();
        // Tree 0 bags rows {0, 1}; tree 1 bags rows {1, 2}.
        let mut bag = BagMap::new(2, 3);
        bag.set(0, 0);
        bag.set(0, 1);
        bag.set(1, 1);
        bag.set(1, 2);
        let y = vec![10.0, 0.0, 10.0];
        let out = forest.predict_reg_oob(&table, &bag, &y).unwrap();

        // Row 0 sees only tree 1, row 2 only tree 0, row 1 no tree.
        assert_eq!(out.predictions[0], 10.0);
        assert!(out.predictions[1].is_nan());
        assert_eq!(out.predictions[2], 20.0);
        assert_eq!(out.rows_unseen, vec![1]);
        assert_eq!(out.leaves_for_row(1), &[-1, -1]);

        // Row 0 exact, row 2 off by 10; divisor stays the row count.
        let mse = out.mse.unwrap();
        assert!((mse - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unanimous_vote_wins() {
        let forest = ctg_forest(2);
        // A row at 0.2 goes left in both trees: census [0, 2].
        let table =
            PredictorTable::from_columns(vec![vec![0.2]], vec![]).unwrap();
        let out = forest.predict_ctg(&table).unwrap();
        assert_eq!(out.predictions, vec![1]);
        assert_eq!(out.census, vec![0, 2]);
    }

    #[test]
    fn vote_breaks_ties_toward_low_category() {
        // Two trees whose left leaves disagree: the census ties 1-1 and
        // the vote must resolve to the lower category.
        let mut forest = ctg_forest(2);
        forest.num[3 + 1] = 0.0;
        forest.num[3 + 2] = 1.0;
        let table =
            PredictorTable::from_columns(vec![vec![0.2]], vec![]).unwrap();
        let out = forest.predict_ctg(&table).unwrap();
        assert_eq!(out.census, vec![1, 1]);
        assert_eq!(out.predictions, vec![0]);
    }

    #[test]
    fn ctg_oob_builds_confusion() {
        let forest = ctg_forest(2);
        let table =
            PredictorTable::from_columns(vec![vec![0.2, 0.9, 0.2]], vec![]).unwrap();
        let mut bag = BagMap::new(2, 3);
        bag.set(0, 1);
        let y = vec![1, 1, 0];
        let out = forest.predict_ctg_oob(&table, &bag, &y).unwrap();

        // Row 0: both trees vote 1 (true 1). Row 1: tree 1 votes 0
        // (true 1). Row 2: both vote 1 (true 0).
        assert_eq!(out.predictions, vec![1, 0, 1]);
        let confusion = out.confusion.unwrap();
        assert_eq!(confusion.as_rows()[1][1], 1);
        assert_eq!(confusion.as_rows()[1][0], 1);
        assert_eq!(confusion.as_rows()[0][1], 1);
        let errors = out.class_errors.unwrap();
        assert_eq!(errors, vec![1.0, 0.5]);
    }

    #[test]
    fn kind_mismatch_rejected() {
        let forest = reg_forest(1);
        let table = PredictorTable::from_columns(vec![vec![0.2]], vec![]).unwrap();
        assert!(matches!(
            forest.predict_ctg(&table),
            Err(ForestError::ResponseKindMismatch { .. })
        ));

        let ctg = ctg_forest(1);
        assert!(matches!(
            ctg.predict_reg(&table),
            Err(ForestError::ResponseKindMismatch { .. })
        ));
    }

    #[test]
    fn corrupt_forest_rejected_before_walk() {
        let mut forest = reg_forest(1);
        forest.bump[0] = 1000;
        let table = PredictorTable::from_columns(vec![vec![0.2]], vec![]).unwrap();
        assert!(matches!(
            forest.predict_reg(&table),
            Err(ForestError::CorruptForest { .. })
        ));
    }

    #[test]
    fn class_errors_empty_class_is_zero() {
        let mut confusion = ConfusionMatrix::new(3);
        confusion.record(0, 0);
        confusion.record(0, 1);
        let errors = confusion.class_errors();
        assert_eq!(errors[0], 0.5);
        assert_eq!(errors[1], 0.0);
        assert_eq!(errors[2], 0.0);
        assert!((confusion.accuracy() - 0.5).abs() < 1e-12);
    }
}
