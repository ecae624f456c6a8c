//! The pre-tree: a grow-only scratchpad for one tree under construction.
//!
//! Nodes are born terminal and may later be promoted to splits, which
//! avoids revising dangling non-terminals from an earlier level. The
//! right child is implicit at `lh_id + 1`. Factor splits append their
//! left-hand bit runs to a tail-growing bitset; the node records the
//! offset of its run in `split_val`, multiplexing the field the packed
//! forest also multiplexes.

use crate::bag::RowBitset;
use crate::sample::Sample;
use crate::stage::SamplePred;

/// A pre-tree node. Terminal while `lh_id` is `None`; split fields are
/// meaningful only after promotion.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PtNode {
    pub lh_id: Option<u32>,
    pub pred_idx: u32,
    pub split_val: f64,
    pub info: f64,
}

const PT_TERMINAL: PtNode = PtNode {
    lh_id: None,
    pred_idx: 0,
    split_val: 0.0,
    info: 0.0,
};

/// Shared height estimate, refined as trees complete so later trees
/// rarely reallocate.
///
/// The initial estimate is four times the smallest balanced tree
/// enclosing the sample count at the minimal splitable node size,
/// rounded up to a power of two; refinement moves it to the next power
/// of two above any observed height. It never shrinks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeightEstimate {
    est: usize,
}

impl HeightEstimate {
    pub fn new(n_samp: usize, min_node: usize) -> Self {
        let mut two_l = 1usize;
        while two_l * min_node < n_samp {
            two_l <<= 1;
        }
        Self { est: two_l << 2 }
    }

    pub fn refine(&mut self, height: usize) {
        while self.est <= height {
            self.est <<= 1;
        }
    }

    pub fn get(&self) -> usize {
        self.est
    }
}

/// Mutable per-tree growth state: node vector, factor-split bit
/// accumulator, in-bag bitset, and the sample-to-node map.
#[derive(Debug)]
pub(crate) struct PreTree {
    nodes: Vec<PtNode>,
    leaf_count: usize,
    split_bits: Vec<bool>,
    tree_bit_offset: usize,
    sample_to_pt: Vec<u32>,
    in_bag: RowBitset,
    sample: Sample,
}

impl PreTree {
    /// Start a tree with a terminal root and every sample mapped to it.
    pub fn new(
        sample: Sample,
        in_bag: RowBitset,
        height_est: usize,
        max_fac_card: usize,
        has_fac: bool,
    ) -> Self {
        let bag_count = sample.bag_count();
        let mut nodes = Vec::with_capacity(height_est);
        nodes.push(PT_TERMINAL);
        let split_bits = if has_fac {
            Vec::with_capacity(height_est * max_fac_card)
        } else {
            Vec::new()
        };
        Self {
            nodes,
            leaf_count: 1,
            split_bits,
            tree_bit_offset: 0,
            sample_to_pt: vec![0; bag_count],
            in_bag,
            sample,
        }
    }

    /// Current node count; every index below is a live node.
    #[inline]
    pub fn height(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn bag_count(&self) -> usize {
        self.sample.bag_count()
    }

    pub fn in_bag(&self) -> &RowBitset {
        &self.in_bag
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn sample_to_pt(&self) -> &[u32] {
        &self.sample_to_pt
    }

    /// Width of the factor-split bit region accumulated so far.
    pub fn fac_width(&self) -> usize {
        self.tree_bit_offset
    }

    /// Grow capacity ahead of a level that may add `split_next` splits.
    ///
    /// Amortized doubling is delegated to the vectors; reserving the
    /// level's worst case up front keeps reallocation off the per-split
    /// path.
    pub fn reserve_level(&mut self, split_next: usize, max_fac_card: usize) {
        self.nodes.reserve(2 * split_next);
        if max_fac_card > 0 {
            self.split_bits.reserve(split_next * max_fac_card);
        }
    }

    /// Append two terminal offspring for a parent, returning their ids.
    ///
    /// The parent's `lh_id` is set here; promotion of the parent itself
    /// follows via [`PreTree::non_terminal_num`] or
    /// [`PreTree::non_terminal_fac`].
    pub fn terminal_offspring(&mut self, par_id: u32) -> (u32, u32) {
        let lh = self.nodes.len() as u32;
        self.nodes.push(PT_TERMINAL);
        self.nodes.push(PT_TERMINAL);
        self.nodes[par_id as usize].lh_id = Some(lh);
        self.leaf_count += 2;
        (lh, lh + 1)
    }

    fn non_terminal(&mut self, id: u32, info: f64, split_val: f64, pred_idx: u32) {
        let node = &mut self.nodes[id as usize];
        node.pred_idx = pred_idx;
        node.split_val = split_val;
        node.info = info;
        self.leaf_count -= 1;
    }

    /// Promote a terminal to a numeric split, returning the offspring ids.
    pub fn non_terminal_num(
        &mut self,
        info: f64,
        pred_idx: u32,
        split_val: f64,
        pt_id: u32,
    ) -> (u32, u32) {
        let offspring = self.terminal_offspring(pt_id);
        self.non_terminal(pt_id, info, split_val, pred_idx);
        offspring
    }

    /// Promote a terminal to a factor split, returning the offspring ids.
    ///
    /// The node's `split_val` records the current bit offset; the bit
    /// region for this split spans the predictor's full cardinality and
    /// is claimed here, all-clear.
    pub fn non_terminal_fac(
        &mut self,
        info: f64,
        pred_idx: u32,
        card: usize,
        pt_id: u32,
    ) -> (u32, u32) {
        let offspring = self.terminal_offspring(pt_id);
        let offset = self.tree_bit_offset;
        self.split_bits.resize(offset + card, false);
        self.tree_bit_offset += card;
        self.non_terminal(pt_id, info, offset as f64, pred_idx);
        offspring
    }

    /// Mark a factor rank as left-going for a factor-split node.
    pub fn lh_bit(&mut self, pt_id: u32, rank: u32) {
        let offset = self.nodes[pt_id as usize].split_val as usize;
        self.split_bits[offset + rank as usize] = true;
    }

    /// Relabel the samples of a staged sub-extent onto a pre-tree node,
    /// returning their bagged response sum.
    pub fn replay(
        &mut self,
        sample_pred: &SamplePred,
        pred: usize,
        source_bit: usize,
        start: usize,
        end: usize,
        new_pt: u32,
    ) -> f64 {
        sample_pred.replay(&mut self.sample_to_pt, pred, source_bit, start, end, new_pt)
    }

    /// Emit the packed node triple for the finished tree.
    ///
    /// Leaf scores must already sit in `num` (see [`Sample::scores`]);
    /// split entries overwrite theirs, terminals keep the score and get
    /// the zero bump sentinel.
    pub fn consume_nodes(&self, pred: &mut [i32], num: &mut [f64], bump: &mut [i32]) {
        for (idx, node) in self.nodes.iter().enumerate() {
            match node.lh_id {
                Some(lh) => {
                    pred[idx] = node.pred_idx as i32;
                    num[idx] = node.split_val;
                    bump[idx] = (lh as usize - idx) as i32;
                }
                None => {
                    bump[idx] = 0;
                }
            }
        }
    }

    /// Widen the factor bitset into integers and release it.
    pub fn consume_split_bits(&mut self) -> Vec<u32> {
        let out = self.split_bits[..self.tree_bit_offset]
            .iter()
            .map(|&b| u32::from(b))
            .collect();
        self.split_bits = Vec::new();
        out
    }

    /// Accumulate each split's information gain onto its predictor.
    pub fn accumulate_info(&self, pred_info: &mut [f64]) {
        for node in &self.nodes {
            if node.lh_id.is_some() {
                pred_info[node.pred_idx as usize] += node.info;
            }
        }
    }

    #[cfg(test)]
    pub fn node(&self, id: u32) -> &PtNode {
        &self.nodes[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{HeightEstimate, PreTree};
    use crate::sample::{Response, Sample};

    fn pre_tree(n_row: usize) -> PreTree {
        let response = Response::regression((0..n_row).map(|i| i as f64).collect()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let (sample, in_bag) = Sample::bag(&response, None, n_row, false, &mut rng);
        PreTree::new(sample, in_bag, 16, 4, true)
    }

    #[test]
    fn height_estimate_initial_and_refine() {
        // Smallest balanced tree enclosing 10 samples at min_node 2: 8 leaves.
        let mut est = HeightEstimate::new(10, 2);
        assert_eq!(est.get(), 32);
        est.refine(31);
        assert_eq!(est.get(), 32);
        est.refine(32);
        assert_eq!(est.get(), 64);
    }

    #[test]
    fn root_starts_terminal() {
        let pt = pre_tree(4);
        assert_eq!(pt.height(), 1);
        assert_eq!(pt.leaf_count(), 1);
        assert!(pt.node(0).lh_id.is_none());
        assert!(pt.sample_to_pt().iter().all(|&id| id == 0));
    }

    #[test]
    fn offspring_and_promotion_bookkeeping() {
        let mut pt = pre_tree(4);
        let (lh, rh) = pt.non_terminal_num(1.5, 0, 0.5, 0);
        assert_eq!((lh, rh), (1, 2));
        assert_eq!(pt.height(), 3);
        // Two leaves added, one terminal promoted: net +1 per split.
        assert_eq!(pt.leaf_count(), 2);
        assert_eq!(pt.node(0).lh_id, Some(1));
        assert_eq!(pt.node(0).split_val, 0.5);

        let (lh2, _) = pt.non_terminal_num(0.7, 0, 0.2, lh);
        assert_eq!(lh2, 3);
        assert_eq!(pt.height(), 5);
        assert_eq!(pt.leaf_count(), 3);
    }

    #[test]
    fn factor_split_claims_bit_region() {
        let mut pt = pre_tree(6);
        let (_, _) = pt.non_terminal_fac(2.0, 1, 3, 0);
        assert_eq!(pt.fac_width(), 3);
        assert_eq!(pt.node(0).split_val, 0.0);

        pt.lh_bit(0, 0);
        pt.lh_bit(0, 2);

        let (_, _) = pt.non_terminal_fac(1.0, 1, 3, 1);
        assert_eq!(pt.fac_width(), 6);
        assert_eq!(pt.node(1).split_val, 3.0);
        pt.lh_bit(1, 1);

        let bits = pt.consume_split_bits();
        assert_eq!(bits, vec![1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn consume_emits_bump_sentinel() {
        let mut pt = pre_tree(4);
        let (lh, _) = pt.non_terminal_num(1.0, 0, 0.5, 0);
        pt.non_terminal_num(0.5, 0, 0.25, lh);

        let height = pt.height();
        let mut pred = vec![0i32; height];
        let mut num = vec![f64::NAN; height];
        let mut bump = vec![-1i32; height];
        // Stand-in leaf scores.
        for slot in num.iter_mut() {
            *slot = 9.0;
        }
        pt.consume_nodes(&mut pred, &mut num, &mut bump);

        assert_eq!(bump[0], 1);
        assert_eq!(bump[1], 2);
        assert_eq!(bump[2], 0);
        assert_eq!(bump[3], 0);
        assert_eq!(bump[4], 0);
        assert_eq!(num[0], 0.5);
        assert_eq!(num[1], 0.25);
        // Terminal scores untouched by consumption.
        assert_eq!(num[2], 9.0);

        let leaves = bump.iter().filter(|&&b| b == 0).count();
        assert_eq!(leaves, pt.leaf_count());
    }

    #[test]
    fn info_accumulates_per_predictor() {
        let mut pt = pre_tree(4);
        let (lh, _) = pt.non_terminal_num(1.0, 0, 0.5, 0);
        pt.non_terminal_num(0.25, 1, 0.1, lh);

        let mut pred_info = vec![0.0; 2];
        pt.accumulate_info(&mut pred_info);
        assert_eq!(pred_info, vec![1.0, 0.25]);
    }
}
