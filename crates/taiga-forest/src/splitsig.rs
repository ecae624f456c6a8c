//! Split signatures: the per-level record of candidate splits.
//!
//! A signature is the minimal shape-and-score summary a predictor's
//! argmax pass emits. The table is dense over `(node, predictor)` with
//! the node index moving fastest, and lives exactly one level. Unset
//! slots carry an information of negative infinity so a single
//! strictly-greater scan distinguishes real candidates, applies the
//! gain floor, and breaks ties toward the lowest predictor index.

use crate::pretree::PreTree;
use crate::session::PredictorTable;
use crate::splitter::RunSet;
use crate::stage::{RowRank, SamplePred};

/// One candidate split: score, shape, and the run set handle for factor
/// predictors (`set_idx` of -1 flags a numeric candidate).
#[derive(Debug, Clone, Copy)]
pub(crate) struct SsNode {
    pub info: f64,
    pub pred_idx: u32,
    pub set_idx: i32,
    pub s_count: u32,
    pub lh_idx_count: u32,
}

const SS_UNSET: SsNode = SsNode {
    info: f64::NEG_INFINITY,
    pred_idx: 0,
    set_idx: -1,
    s_count: 0,
    lh_idx_count: 0,
};

/// Dense per-level candidate table.
#[derive(Debug)]
pub(crate) struct SplitSig {
    level_ss: Vec<SsNode>,
    split_count: usize,
    n_pred: usize,
}

impl SplitSig {
    pub fn new(n_pred: usize) -> Self {
        Self {
            level_ss: Vec::new(),
            split_count: 0,
            n_pred,
        }
    }

    /// Allocate the level's table, all slots unset.
    pub fn level_init(&mut self, split_count: usize) {
        self.split_count = split_count;
        self.level_ss.clear();
        self.level_ss.resize(split_count * self.n_pred, SS_UNSET);
    }

    /// Drop the level's table.
    pub fn level_clear(&mut self) {
        self.level_ss.clear();
        self.split_count = 0;
    }

    #[inline]
    fn slot(&self, level_idx: usize, pred_idx: usize) -> usize {
        level_idx + pred_idx * self.split_count
    }

    /// Record a candidate for `(node, predictor)`.
    pub fn write(
        &mut self,
        level_idx: usize,
        pred_idx: u32,
        set_idx: i32,
        s_count: u32,
        lh_idx_count: u32,
        info: f64,
    ) {
        let slot = self.slot(level_idx, pred_idx as usize);
        self.level_ss[slot] = SsNode {
            info,
            pred_idx,
            set_idx,
            s_count,
            lh_idx_count,
        };
    }

    /// The candidate with the largest information strictly above the
    /// gain floor, scanning predictors in index order so ties keep the
    /// first seen.
    pub fn arg_max(&self, level_idx: usize, gain_floor: f64) -> Option<SsNode> {
        let mut gain_max = gain_floor;
        let mut best = None;
        for pred_idx in 0..self.n_pred {
            let cand = &self.level_ss[self.slot(level_idx, pred_idx)];
            if cand.info > gain_max {
                gain_max = cand.info;
                best = Some(*cand);
            }
        }
        best
    }
}

impl SsNode {
    /// Apply this winning candidate: promote the pre-tree node, replay
    /// the children onto the sample map, and return the left-hand
    /// response sum with the offspring ids.
    ///
    /// Factor splits replay the whole extent right first and then
    /// overwrite each left-going run, setting its level bit as they go;
    /// numeric splits replay the two halves around the index count and
    /// take the midpoint of the bracketing ranks as threshold.
    pub fn non_terminal(
        &self,
        sample_pred: &SamplePred,
        pre_tree: &mut PreTree,
        runs: &RunSet,
        row_rank: &RowRank,
        table: &PredictorTable,
        source_bit: usize,
        start: usize,
        end: usize,
        pt_id: u32,
    ) -> (f64, u32, u32) {
        let pred = self.pred_idx as usize;
        if self.set_idx >= 0 {
            let card = table.fac_card(pred - table.n_pred_num());
            let (pt_lh, pt_rh) = pre_tree.non_terminal_fac(self.info, self.pred_idx, card, pt_id);
            pre_tree.replay(sample_pred, pred, source_bit, start, end, pt_rh);

            let mut lh_sum = 0.0;
            for slot in runs.lh_slots(self.set_idx) {
                pre_tree.lh_bit(pt_id, slot.rank);
                lh_sum +=
                    pre_tree.replay(sample_pred, pred, source_bit, slot.start, slot.end, pt_lh);
            }
            (lh_sum, pt_lh, pt_rh)
        } else {
            let split_pos = start + self.lh_idx_count as usize - 1;
            let (rk_low, rk_high) = sample_pred.split_ranks(pred, source_bit, split_pos);
            let split_val =
                0.5 * (row_rank.value(pred, rk_low) + row_rank.value(pred, rk_high));
            let (pt_lh, pt_rh) =
                pre_tree.non_terminal_num(self.info, self.pred_idx, split_val, pt_id);

            let lh_sum = pre_tree.replay(sample_pred, pred, source_bit, start, split_pos, pt_lh);
            pre_tree.replay(sample_pred, pred, source_bit, split_pos + 1, end, pt_rh);
            (lh_sum, pt_lh, pt_rh)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SplitSig;

    #[test]
    fn unset_slots_never_win() {
        let mut sig = SplitSig::new(3);
        sig.level_init(2);
        assert!(sig.arg_max(0, 0.0).is_none());
        assert!(sig.arg_max(1, 0.0).is_none());
    }

    #[test]
    fn arg_max_respects_floor() {
        let mut sig = SplitSig::new(2);
        sig.level_init(1);
        sig.write(0, 0, -1, 4, 2, 0.5);
        sig.write(0, 1, -1, 4, 2, 0.8);

        let won = sig.arg_max(0, 0.0).unwrap();
        assert_eq!(won.pred_idx, 1);
        assert!((won.info - 0.8).abs() < 1e-12);

        // Floor at the maximum excludes everything: strictly greater only.
        assert!(sig.arg_max(0, 0.8).is_none());
        assert!(sig.arg_max(0, 0.79).is_some());
    }

    #[test]
    fn arg_max_tie_keeps_lowest_predictor() {
        let mut sig = SplitSig::new(3);
        sig.level_init(1);
        sig.write(0, 0, -1, 4, 2, 0.5);
        sig.write(0, 1, -1, 4, 2, 0.5);
        sig.write(0, 2, -1, 4, 2, 0.5);

        let won = sig.arg_max(0, 0.0).unwrap();
        assert_eq!(won.pred_idx, 0);
    }

    #[test]
    fn slots_are_per_node() {
        let mut sig = SplitSig::new(2);
        sig.level_init(2);
        sig.write(0, 0, -1, 4, 2, 1.0);
        sig.write(1, 1, 0, 6, 3, 2.0);

        let n0 = sig.arg_max(0, 0.0).unwrap();
        let n1 = sig.arg_max(1, 0.0).unwrap();
        assert_eq!(n0.pred_idx, 0);
        assert_eq!(n0.set_idx, -1);
        assert_eq!(n1.pred_idx, 1);
        assert_eq!(n1.set_idx, 0);
        assert_eq!(n1.lh_idx_count, 3);
    }

    #[test]
    fn level_reinit_clears_candidates() {
        let mut sig = SplitSig::new(1);
        sig.level_init(1);
        sig.write(0, 0, -1, 4, 2, 1.0);
        sig.level_clear();
        sig.level_init(1);
        assert!(sig.arg_max(0, 0.0).is_none());
    }

    #[test]
    fn negative_candidate_never_beats_zero_floor() {
        let mut sig = SplitSig::new(1);
        sig.level_init(1);
        sig.write(0, 0, -1, 4, 2, -0.25);
        assert!(sig.arg_max(0, 0.0).is_none());
    }
}
