//! Response vectors and per-tree bagged samples.
//!
//! A [`Sample`] is the bagged view of the response for one tree: each
//! drawn row appears once with a multiplicity (`s_count`), a bagged
//! response sum, and its category for classification. The sample also
//! writes the per-leaf scores during consumption, keeping the pre-tree
//! itself response-agnostic.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::ChaCha8Rng;

use crate::bag::RowBitset;
use crate::error::ForestError;

/// Training response: continuous for regression, categorical for
/// classification.
///
/// Classification carries a numeric proxy used wherever a scalar
/// response is needed (factor-run ordering, replay sums); it defaults to
/// the category index.
#[derive(Debug, Clone)]
pub enum Response {
    /// Continuous response.
    Reg {
        /// Response values, one per row.
        y: Vec<f64>,
    },
    /// Categorical response.
    Ctg {
        /// Zero-based category per row.
        y_ctg: Vec<u32>,
        /// Scalar proxy per row.
        proxy: Vec<f64>,
        /// Response cardinality.
        ctg_width: usize,
    },
}

impl Response {
    /// Create a regression response.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::EmptyDataset`] when `y` is empty and
    /// [`ForestError::NonFiniteValue`] when any value is NaN or infinite.
    pub fn regression(y: Vec<f64>) -> Result<Self, ForestError> {
        if y.is_empty() {
            return Err(ForestError::EmptyDataset);
        }
        for (row, &val) in y.iter().enumerate() {
            if !val.is_finite() {
                return Err(ForestError::NonFiniteValue { row, pred: 0 });
            }
        }
        Ok(Self::Reg { y })
    }

    /// Create a classification response with the category index as proxy.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::EmptyDataset`] | `y_ctg` is empty |
    /// | [`ForestError::ZeroClasses`] | `ctg_width` is zero |
    /// | [`ForestError::CategoryOutOfRange`] | any label >= `ctg_width` |
    pub fn classification(y_ctg: Vec<u32>, ctg_width: usize) -> Result<Self, ForestError> {
        let proxy = y_ctg.iter().map(|&c| c as f64).collect();
        Self::classification_with_proxy(y_ctg, proxy, ctg_width)
    }

    /// Create a classification response with an explicit proxy vector.
    ///
    /// # Errors
    ///
    /// As [`Response::classification`], plus
    /// [`ForestError::ResponseLengthMismatch`] when the proxy length
    /// differs from the label length.
    pub fn classification_with_proxy(
        y_ctg: Vec<u32>,
        proxy: Vec<f64>,
        ctg_width: usize,
    ) -> Result<Self, ForestError> {
        if y_ctg.is_empty() {
            return Err(ForestError::EmptyDataset);
        }
        if ctg_width == 0 {
            return Err(ForestError::ZeroClasses);
        }
        if proxy.len() != y_ctg.len() {
            return Err(ForestError::ResponseLengthMismatch {
                expected: y_ctg.len(),
                got: proxy.len(),
            });
        }
        for (row, &ctg) in y_ctg.iter().enumerate() {
            if ctg as usize >= ctg_width {
                return Err(ForestError::CategoryOutOfRange {
                    row,
                    got: ctg,
                    ctg_width,
                });
            }
        }
        Ok(Self::Ctg {
            y_ctg,
            proxy,
            ctg_width,
        })
    }

    /// Return the row count.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Reg { y } => y.len(),
            Self::Ctg { y_ctg, .. } => y_ctg.len(),
        }
    }

    /// Return true when the response is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the category cardinality, zero for regression.
    #[must_use]
    pub fn ctg_width(&self) -> usize {
        match self {
            Self::Reg { .. } => 0,
            Self::Ctg { ctg_width, .. } => *ctg_width,
        }
    }

    /// Scalar response value for a row: `y` or the classification proxy.
    #[inline]
    pub(crate) fn value(&self, row: usize) -> f64 {
        match self {
            Self::Reg { y } => y[row],
            Self::Ctg { proxy, .. } => proxy[row],
        }
    }

    /// Category for a row; zero for regression.
    #[inline]
    pub(crate) fn category(&self, row: usize) -> u32 {
        match self {
            Self::Reg { .. } => 0,
            Self::Ctg { y_ctg, .. } => y_ctg[row],
        }
    }
}

/// One bagged row: multiplicity, bagged response sum, category.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SampleNode {
    pub row: u32,
    pub s_count: u32,
    pub y_sum: f64,
    pub ctg: u32,
}

/// The bagged response for a single tree.
///
/// `nodes` is ordered by row, so the sample index doubles as a stable
/// row ordering for staging.
#[derive(Debug)]
pub(crate) struct Sample {
    nodes: Vec<SampleNode>,
    bag_sum: f64,
    ctg_width: usize,
}

impl Sample {
    /// Draw the bag for one tree and fill the row-indexed bitset.
    ///
    /// With replacement: `n_samp` independent draws, optionally weighted.
    /// Without replacement: `n_samp` distinct rows by partial
    /// Fisher-Yates, each with multiplicity one.
    pub fn bag(
        response: &Response,
        weights: Option<&[f64]>,
        n_samp: usize,
        with_replacement: bool,
        rng: &mut ChaCha8Rng,
    ) -> (Self, RowBitset) {
        let n_row = response.len();
        let mut counts = vec![0u32; n_row];

        if with_replacement {
            match weights {
                Some(w) => {
                    // Weights validated at config time; uniform fallback on
                    // a degenerate all-zero vector.
                    let dist = WeightedIndex::new(w.iter().copied());
                    match dist {
                        Ok(dist) => {
                            for _ in 0..n_samp {
                                counts[dist.sample(rng)] += 1;
                            }
                        }
                        Err(_) => {
                            for _ in 0..n_samp {
                                counts[rng.gen_range(0..n_row)] += 1;
                            }
                        }
                    }
                }
                None => {
                    for _ in 0..n_samp {
                        counts[rng.gen_range(0..n_row)] += 1;
                    }
                }
            }
        } else {
            let mut order: Vec<usize> = (0..n_row).collect();
            for i in 0..n_samp.min(n_row) {
                let j = rng.gen_range(i..n_row);
                order.swap(i, j);
            }
            for &row in order.iter().take(n_samp.min(n_row)) {
                counts[row] = 1;
            }
        }

        let mut in_bag = RowBitset::new(n_row);
        let mut nodes = Vec::new();
        let mut bag_sum = 0.0;
        for (row, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            in_bag.set(row);
            let y_sum = response.value(row) * f64::from(count);
            bag_sum += y_sum;
            nodes.push(SampleNode {
                row: row as u32,
                s_count: count,
                y_sum,
                ctg: response.category(row),
            });
        }

        (
            Self {
                nodes,
                bag_sum,
                ctg_width: response.ctg_width(),
            },
            in_bag,
        )
    }

    /// Return the distinct in-bag row count.
    #[must_use]
    pub fn bag_count(&self) -> usize {
        self.nodes.len()
    }

    /// Return the bagged response sum over all samples.
    #[must_use]
    pub fn bag_sum(&self) -> f64 {
        self.bag_sum
    }

    /// Return the total sample multiplicity.
    #[must_use]
    pub fn s_count_total(&self) -> u32 {
        self.nodes.iter().map(|n| n.s_count).sum()
    }

    pub fn nodes(&self) -> &[SampleNode] {
        &self.nodes
    }

    /// Write per-leaf scores into the node scratch.
    ///
    /// Regression: the bagged mean of each pre-tree node's samples.
    /// Classification: the multiplicity-weighted majority category, ties
    /// to the lowest index, written as `f64`.
    ///
    /// Non-terminal entries are overwritten during node consumption, so
    /// every pre-tree node may be scored here; interior nodes, whose
    /// samples have all migrated to the frontier, score the NaN
    /// sentinel and are immediately overwritten.
    pub fn scores(&self, sample_to_pt: &[u32], height: usize, num: &mut [f64]) {
        if self.ctg_width == 0 {
            let mut sums = vec![0.0f64; height];
            let mut masses = vec![0u32; height];
            for (s_idx, node) in self.nodes.iter().enumerate() {
                let pt = sample_to_pt[s_idx] as usize;
                sums[pt] += node.y_sum;
                masses[pt] += node.s_count;
            }
            for pt in 0..height {
                num[pt] = if masses[pt] > 0 {
                    sums[pt] / f64::from(masses[pt])
                } else {
                    f64::NAN
                };
            }
        } else {
            let mut census = vec![0u32; height * self.ctg_width];
            for (s_idx, node) in self.nodes.iter().enumerate() {
                let pt = sample_to_pt[s_idx] as usize;
                census[pt * self.ctg_width + node.ctg as usize] += node.s_count;
            }
            for pt in 0..height {
                let slice = &census[pt * self.ctg_width..(pt + 1) * self.ctg_width];
                let mut arg_max = -1i64;
                let mut pop_max = 0u32;
                for (ctg, &pop) in slice.iter().enumerate() {
                    if pop > pop_max {
                        pop_max = pop;
                        arg_max = ctg as i64;
                    }
                }
                num[pt] = if arg_max >= 0 { arg_max as f64 } else { f64::NAN };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{Response, Sample};
    use crate::error::ForestError;

    #[test]
    fn regression_rejects_nan() {
        let err = Response::regression(vec![1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, ForestError::NonFiniteValue { row: 1, .. }));
    }

    #[test]
    fn classification_rejects_out_of_range() {
        let err = Response::classification(vec![0, 3], 3).unwrap_err();
        assert!(matches!(
            err,
            ForestError::CategoryOutOfRange { row: 1, got: 3, ctg_width: 3 }
        ));
    }

    #[test]
    fn classification_zero_width_error() {
        let err = Response::classification(vec![0], 0).unwrap_err();
        assert!(matches!(err, ForestError::ZeroClasses));
    }

    #[test]
    fn bag_with_replacement_conserves_draws() {
        let response = Response::regression(vec![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let (sample, in_bag) = Sample::bag(&response, None, 5, true, &mut rng);

        assert_eq!(sample.s_count_total(), 5);
        assert!(sample.bag_count() <= 5);
        for node in sample.nodes() {
            assert!(in_bag.test(node.row as usize));
            assert!((node.y_sum - response.value(node.row as usize) * f64::from(node.s_count)).abs() < 1e-12);
        }
    }

    #[test]
    fn bag_without_replacement_distinct_rows() {
        let response = Response::regression(vec![1.0; 10]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let (sample, _) = Sample::bag(&response, None, 6, false, &mut rng);
        assert_eq!(sample.bag_count(), 6);
        assert!(sample.nodes().iter().all(|n| n.s_count == 1));
    }

    #[test]
    fn regression_scores_are_bagged_means() {
        let response = Response::regression(vec![2.0, 4.0, 6.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (sample, _) = Sample::bag(&response, None, 3, false, &mut rng);

        // Every sample mapped to node 0: score is the bagged mean.
        let sample_to_pt = vec![0u32; sample.bag_count()];
        let mut num = vec![0.0; 1];
        sample.scores(&sample_to_pt, 1, &mut num);
        assert!((num[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn classification_scores_majority_ties_low() {
        let response = Response::classification(vec![1, 0, 1, 0], 2).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (sample, _) = Sample::bag(&response, None, 4, false, &mut rng);

        let sample_to_pt = vec![0u32; 4];
        let mut num = vec![f64::NAN; 1];
        sample.scores(&sample_to_pt, 1, &mut num);
        // 2 vs 2: tie resolves to the lower category.
        assert_eq!(num[0], 0.0);
    }

    #[test]
    fn empty_node_scores_nan() {
        let response = Response::regression(vec![1.0, 2.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (sample, _) = Sample::bag(&response, None, 2, false, &mut rng);

        let sample_to_pt = vec![1u32; 2];
        let mut num = vec![0.0; 2];
        sample.scores(&sample_to_pt, 2, &mut num);
        assert!(num[0].is_nan());
        assert!(num[1].is_finite());
    }
}
