//! Staged per-predictor sample views.
//!
//! [`RowRank`] is the once-per-table presort: dense value ranks per
//! numeric column plus the sorted distinct values those ranks index,
//! from which split thresholds are derived as midpoints of adjacent
//! ranks.
//!
//! [`SamplePred`] holds, for every predictor, the tree's bagged samples
//! sorted by that predictor. The views are double-buffered: each level
//! reads from one buffer and the inter-level restage writes the stable
//! partition of every split node's extent into the other, so a node's
//! samples stay contiguous in every predictor's view throughout growth.

use crate::sample::Sample;
use crate::session::PredictorTable;

/// Per-column dense ranks and sorted distinct values.
#[derive(Debug)]
pub(crate) struct RowRank {
    n_row: usize,
    row_rank: Vec<u32>,
    rank_off: Vec<usize>,
    rank_val: Vec<f64>,
}

impl RowRank {
    /// Presort every numeric column of the table.
    pub fn build(table: &PredictorTable) -> Self {
        let n_row = table.n_row();
        let n_pred_num = table.n_pred_num();
        let mut row_rank = vec![0u32; n_pred_num * n_row];
        let mut rank_off = Vec::with_capacity(n_pred_num + 1);
        let mut rank_val = Vec::new();

        rank_off.push(0);
        for col in 0..n_pred_num {
            let mut order: Vec<u32> = (0..n_row as u32).collect();
            order.sort_unstable_by(|&a, &b| {
                table
                    .num_value(a as usize, col)
                    .total_cmp(&table.num_value(b as usize, col))
                    .then(a.cmp(&b))
            });

            let mut rank = 0u32;
            let mut prev = f64::NAN;
            for &row in &order {
                let val = table.num_value(row as usize, col);
                if val != prev {
                    rank_val.push(val);
                    rank = (rank_val.len() - rank_off[col]) as u32 - 1;
                    prev = val;
                }
                row_rank[col * n_row + row as usize] = rank;
            }
            rank_off.push(rank_val.len());
        }

        Self {
            n_row,
            row_rank,
            rank_off,
            rank_val,
        }
    }

    /// Dense rank of a row's value within its column.
    #[inline]
    pub fn rank(&self, num_col: usize, row: usize) -> u32 {
        self.row_rank[num_col * self.n_row + row]
    }

    /// The distinct value at a rank.
    #[inline]
    pub fn value(&self, num_col: usize, rank: u32) -> f64 {
        self.rank_val[self.rank_off[num_col] + rank as usize]
    }

    /// Distinct value count of a column.
    #[cfg(test)]
    pub fn rank_count(&self, num_col: usize) -> usize {
        self.rank_off[num_col + 1] - self.rank_off[num_col]
    }
}

/// One staged sample slot: sample index, sort key, and the response
/// fields the splitter scans without indirection.
///
/// `rank` is the dense numeric rank for numeric predictors and the
/// factor level for factor predictors.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpNode {
    pub s_idx: u32,
    pub rank: u32,
    pub s_count: u32,
    pub ctg: u32,
    pub y_sum: f64,
}

const SP_ZERO: SpNode = SpNode {
    s_idx: 0,
    rank: 0,
    s_count: 0,
    ctg: 0,
    y_sum: 0.0,
};

/// A parent extent scheduled for restaging, with the pre-tree index its
/// left child received at replay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RestageExtent {
    pub start: usize,
    pub end: usize,
    pub lh_pt: u32,
}

/// Double-buffered staged sample views, one per predictor.
#[derive(Debug)]
pub(crate) struct SamplePred {
    n_pred: usize,
    bag_count: usize,
    buf: Vec<SpNode>,
}

impl SamplePred {
    #[inline]
    fn base(&self, pred: usize, bit: usize) -> usize {
        (pred * 2 + bit) * self.bag_count
    }

    /// Stage the bagged samples: sort per predictor into buffer zero.
    ///
    /// Ties sort by sample index, keeping staging deterministic.
    pub fn stage(sample: &Sample, row_rank: &RowRank, table: &PredictorTable) -> Self {
        let n_pred = table.n_pred();
        let n_pred_num = table.n_pred_num();
        let bag_count = sample.bag_count();
        let mut buf = vec![SP_ZERO; 2 * n_pred * bag_count];

        let mut scratch: Vec<SpNode> = Vec::with_capacity(bag_count);
        for pred in 0..n_pred {
            scratch.clear();
            for (s_idx, node) in sample.nodes().iter().enumerate() {
                let rank = if pred < n_pred_num {
                    row_rank.rank(pred, node.row as usize)
                } else {
                    table.fac_value(node.row as usize, pred - n_pred_num)
                };
                scratch.push(SpNode {
                    s_idx: s_idx as u32,
                    rank,
                    s_count: node.s_count,
                    ctg: node.ctg,
                    y_sum: node.y_sum,
                });
            }
            scratch.sort_unstable_by_key(|n| (n.rank, n.s_idx));

            let base = (pred * 2) * bag_count;
            buf[base..base + bag_count].copy_from_slice(&scratch);
        }

        Self {
            n_pred,
            bag_count,
            buf,
        }
    }

    /// The staged slots of a node's extent, inclusive bounds.
    #[inline]
    pub fn extent(&self, pred: usize, bit: usize, start: usize, end: usize) -> &[SpNode] {
        let base = self.base(pred, bit);
        &self.buf[base + start..=base + end]
    }

    /// Relabel every sample in `[start, end]` of the `(pred, bit)` view
    /// to a new pre-tree index, returning the bagged response sum.
    pub fn replay(
        &self,
        sample_to_pt: &mut [u32],
        pred: usize,
        bit: usize,
        start: usize,
        end: usize,
        new_pt: u32,
    ) -> f64 {
        let base = self.base(pred, bit);
        let mut sum = 0.0;
        for node in &self.buf[base + start..=base + end] {
            sample_to_pt[node.s_idx as usize] = new_pt;
            sum += node.y_sum;
        }
        sum
    }

    /// The bracketing ranks around a numeric split position.
    pub fn split_ranks(&self, pred: usize, bit: usize, pos: usize) -> (u32, u32) {
        let base = self.base(pred, bit);
        (self.buf[base + pos].rank, self.buf[base + pos + 1].rank)
    }

    /// Stable-partition every split node's extent into its children, for
    /// every predictor, writing the opposite buffer.
    ///
    /// Membership comes from `sample_to_pt` after replay: a sample
    /// labeled with the extent's left-child index goes left, everything
    /// else in the extent goes right. Extents of nodes that did not
    /// split are dead and are not carried forward.
    pub fn restage(
        &mut self,
        sample_to_pt: &[u32],
        source_bit: usize,
        parents: &[RestageExtent],
    ) {
        let target_bit = source_bit ^ 1;
        for pred in 0..self.n_pred {
            let src = self.base(pred, source_bit);
            let dst = self.base(pred, target_bit);
            for parent in parents {
                let mut lh_count = 0usize;
                for pos in parent.start..=parent.end {
                    let node = self.buf[src + pos];
                    if sample_to_pt[node.s_idx as usize] == parent.lh_pt {
                        lh_count += 1;
                    }
                }
                let mut lh_cursor = dst + parent.start;
                let mut rh_cursor = dst + parent.start + lh_count;
                for pos in parent.start..=parent.end {
                    let node = self.buf[src + pos];
                    if sample_to_pt[node.s_idx as usize] == parent.lh_pt {
                        self.buf[lh_cursor] = node;
                        lh_cursor += 1;
                    } else {
                        self.buf[rh_cursor] = node;
                        rh_cursor += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{RestageExtent, RowRank, SamplePred};
    use crate::sample::{Response, Sample};
    use crate::session::PredictorTable;

    fn staged_fixture() -> (PredictorTable, RowRank, Sample, SamplePred) {
        let table = PredictorTable::from_columns(
            vec![vec![0.9, 0.1, 0.4, 0.4, 0.6]],
            vec![vec![2, 0, 1, 0, 2]],
        )
        .unwrap();
        let row_rank = RowRank::build(&table);
        let response = Response::regression(vec![5.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (sample, _) = Sample::bag(&response, None, 5, false, &mut rng);
        let sample_pred = SamplePred::stage(&sample, &row_rank, &table);
        (table, row_rank, sample, sample_pred)
    }

    #[test]
    fn dense_ranks_share_ties() {
        let (_, row_rank, _, _) = staged_fixture();
        // Sorted distinct values: 0.1, 0.4, 0.6, 0.9.
        assert_eq!(row_rank.rank_count(0), 4);
        assert_eq!(row_rank.rank(0, 1), 0);
        assert_eq!(row_rank.rank(0, 2), 1);
        assert_eq!(row_rank.rank(0, 3), 1);
        assert_eq!(row_rank.rank(0, 4), 2);
        assert_eq!(row_rank.rank(0, 0), 3);
        assert_eq!(row_rank.value(0, 1), 0.4);
    }

    #[test]
    fn staging_sorts_each_predictor() {
        let (_, _, sample, sample_pred) = staged_fixture();
        let n = sample.bag_count();
        let numeric = sample_pred.extent(0, 0, 0, n - 1);
        for w in numeric.windows(2) {
            assert!(w[0].rank <= w[1].rank);
        }
        let factor = sample_pred.extent(1, 0, 0, n - 1);
        for w in factor.windows(2) {
            assert!(w[0].rank <= w[1].rank);
        }
    }

    #[test]
    fn replay_sums_and_relabels() {
        let (_, _, sample, sample_pred) = staged_fixture();
        let n = sample.bag_count();
        let mut sample_to_pt = vec![0u32; n];
        let sum = sample_pred.replay(&mut sample_to_pt, 0, 0, 0, n - 1, 7);
        assert!((sum - sample.bag_sum()).abs() < 1e-12);
        assert!(sample_to_pt.iter().all(|&pt| pt == 7));
    }

    #[test]
    fn restage_partitions_stably() {
        let (_, _, sample, mut sample_pred) = staged_fixture();
        let n = sample.bag_count();

        // Send the low two numeric ranks left (pre-tree node 1), rest right (2).
        let mut sample_to_pt = vec![0u32; n];
        sample_pred.replay(&mut sample_to_pt, 0, 0, 0, n - 1, 2);
        sample_pred.replay(&mut sample_to_pt, 0, 0, 0, 1, 1);

        sample_pred.restage(
            &sample_to_pt,
            0,
            &[RestageExtent {
                start: 0,
                end: n - 1,
                lh_pt: 1,
            }],
        );

        // Every predictor's target view has the left samples first, each
        // side still sorted by rank.
        for pred in 0..2 {
            let view = sample_pred.extent(pred, 1, 0, n - 1);
            for node in &view[..2] {
                assert_eq!(sample_to_pt[node.s_idx as usize], 1);
            }
            for node in &view[2..] {
                assert_eq!(sample_to_pt[node.s_idx as usize], 2);
            }
            for w in view[..2].windows(2) {
                assert!(w[0].rank <= w[1].rank);
            }
            for w in view[2..].windows(2) {
                assert!(w[0].rank <= w[1].rank);
            }
        }
    }

    #[test]
    fn split_ranks_bracket_position() {
        let (_, _, sample, sample_pred) = staged_fixture();
        let n = sample.bag_count();
        let view = sample_pred.extent(0, 0, 0, n - 1);
        let (lo, hi) = sample_pred.split_ranks(0, 0, 1);
        assert_eq!(lo, view[1].rank);
        assert_eq!(hi, view[2].rank);
    }
}
