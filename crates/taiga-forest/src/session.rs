//! Session immutables and the predictor table.
//!
//! A [`Session`] fixes the shape parameters that every other component
//! derives its bounds from. A [`PredictorTable`] owns the column data in
//! the layout the tree walker consumes: numeric columns first, factor
//! columns after, both column-major.

use crate::error::ForestError;

/// Largest admissible factor cardinality for a single predictor column.
///
/// Factor split bitsets are sized proportionally to cardinality, so an
/// unbounded column would blow up the per-tree bit storage.
pub const MAX_FAC_CARD: usize = 1 << 10;

/// Shape parameters fixed for the lifetime of a training or prediction
/// session.
///
/// Invariant: `n_pred() = n_pred_num + n_pred_fac >= 1` and all counts
/// are nonzero where required, enforced at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub(crate) n_row: usize,
    pub(crate) n_pred_num: usize,
    pub(crate) n_pred_fac: usize,
    pub(crate) n_tree: usize,
    pub(crate) max_fac_card: usize,
}

impl Session {
    /// Create a session from validated shape parameters.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::EmptyDataset`] | `n_row` is zero |
    /// | [`ForestError::ZeroPredictors`] | both predictor counts are zero |
    /// | [`ForestError::InvalidTreeCount`] | `n_tree` is zero |
    pub fn new(
        n_row: usize,
        n_pred_num: usize,
        n_pred_fac: usize,
        n_tree: usize,
        max_fac_card: usize,
    ) -> Result<Self, ForestError> {
        if n_row == 0 {
            return Err(ForestError::EmptyDataset);
        }
        if n_pred_num + n_pred_fac == 0 {
            return Err(ForestError::ZeroPredictors);
        }
        if n_tree == 0 {
            return Err(ForestError::InvalidTreeCount { n_tree });
        }
        Ok(Self {
            n_row,
            n_pred_num,
            n_pred_fac,
            n_tree,
            max_fac_card,
        })
    }

    /// Return the number of rows.
    #[must_use]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    /// Return the total predictor count.
    #[must_use]
    pub fn n_pred(&self) -> usize {
        self.n_pred_num + self.n_pred_fac
    }

    /// Return the numeric predictor count.
    #[must_use]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    /// Return the factor predictor count.
    #[must_use]
    pub fn n_pred_fac(&self) -> usize {
        self.n_pred_fac
    }

    /// Return the tree count.
    #[must_use]
    pub fn n_tree(&self) -> usize {
        self.n_tree
    }

    /// Return the widest factor cardinality across predictors.
    #[must_use]
    pub fn max_fac_card(&self) -> usize {
        self.max_fac_card
    }

    /// Project a global predictor index onto the factor-only index space.
    ///
    /// Numeric predictors occupy the global range `[0, n_pred_num)`;
    /// factor predictors follow. Returns `None` for numeric predictors.
    #[must_use]
    pub fn fac_idx(&self, pred: usize) -> Option<usize> {
        if pred >= self.n_pred_num {
            Some(pred - self.n_pred_num)
        } else {
            None
        }
    }
}

/// Column-major predictor data for training or a prediction batch.
///
/// Numeric values live at `num[col * n_row + row]`; factor levels at
/// `fac[col * n_row + row]` with per-column cardinality recorded at
/// construction. Global predictor indices place numeric columns first.
#[derive(Debug, Clone)]
pub struct PredictorTable {
    n_row: usize,
    num: Vec<f64>,
    fac: Vec<u32>,
    fac_card: Vec<u32>,
    n_pred_num: usize,
    n_pred_fac: usize,
}

impl PredictorTable {
    /// Build a table from per-column vectors.
    ///
    /// Each numeric column must hold `n_row` finite values; each factor
    /// column holds levels in `[0, cardinality)` where cardinality is the
    /// observed maximum plus one, bounded by [`MAX_FAC_CARD`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::EmptyDataset`] | zero rows |
    /// | [`ForestError::ZeroPredictors`] | no columns at all |
    /// | [`ForestError::ColumnLengthMismatch`] | ragged columns |
    /// | [`ForestError::NonFiniteValue`] | NaN or infinite numeric value |
    /// | [`ForestError::CardinalityBound`] | factor cardinality above the bound |
    pub fn from_columns(
        num_cols: Vec<Vec<f64>>,
        fac_cols: Vec<Vec<u32>>,
    ) -> Result<Self, ForestError> {
        let n_pred_num = num_cols.len();
        let n_pred_fac = fac_cols.len();
        if n_pred_num + n_pred_fac == 0 {
            return Err(ForestError::ZeroPredictors);
        }
        let n_row = num_cols
            .first()
            .map(Vec::len)
            .or_else(|| fac_cols.first().map(Vec::len))
            .unwrap_or(0);
        if n_row == 0 {
            return Err(ForestError::EmptyDataset);
        }

        let mut num = Vec::with_capacity(n_pred_num * n_row);
        for (col_idx, col) in num_cols.iter().enumerate() {
            if col.len() != n_row {
                return Err(ForestError::ColumnLengthMismatch {
                    pred: col_idx,
                    expected: n_row,
                    got: col.len(),
                });
            }
            for (row, &val) in col.iter().enumerate() {
                if !val.is_finite() {
                    return Err(ForestError::NonFiniteValue { row, pred: col_idx });
                }
            }
            num.extend_from_slice(col);
        }

        let mut fac = Vec::with_capacity(n_pred_fac * n_row);
        let mut fac_card = Vec::with_capacity(n_pred_fac);
        for (col_idx, col) in fac_cols.iter().enumerate() {
            if col.len() != n_row {
                return Err(ForestError::ColumnLengthMismatch {
                    pred: n_pred_num + col_idx,
                    expected: n_row,
                    got: col.len(),
                });
            }
            let card = col.iter().max().map_or(1, |&m| m as usize + 1);
            if card > MAX_FAC_CARD {
                return Err(ForestError::CardinalityBound {
                    pred: col_idx,
                    cardinality: card,
                    bound: MAX_FAC_CARD,
                });
            }
            fac_card.push(card as u32);
            fac.extend_from_slice(col);
        }

        Ok(Self {
            n_row,
            num,
            fac,
            fac_card,
            n_pred_num,
            n_pred_fac,
        })
    }

    /// Return the number of rows.
    #[must_use]
    pub fn n_row(&self) -> usize {
        self.n_row
    }

    /// Return the numeric column count.
    #[must_use]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    /// Return the factor column count.
    #[must_use]
    pub fn n_pred_fac(&self) -> usize {
        self.n_pred_fac
    }

    /// Return the total predictor count.
    #[must_use]
    pub fn n_pred(&self) -> usize {
        self.n_pred_num + self.n_pred_fac
    }

    /// Return the widest factor cardinality, or zero without factor columns.
    #[must_use]
    pub fn max_fac_card(&self) -> usize {
        self.fac_card.iter().max().map_or(0, |&c| c as usize)
    }

    /// Return the cardinality of a factor column.
    #[must_use]
    pub fn fac_card(&self, fac_col: usize) -> usize {
        self.fac_card[fac_col] as usize
    }

    /// Return the numeric value at `(row, numeric column)`.
    #[inline]
    #[must_use]
    pub fn num_value(&self, row: usize, num_col: usize) -> f64 {
        self.num[num_col * self.n_row + row]
    }

    /// Return the factor level at `(row, factor column)`.
    #[inline]
    #[must_use]
    pub fn fac_value(&self, row: usize, fac_col: usize) -> u32 {
        self.fac[fac_col * self.n_row + row]
    }
}
