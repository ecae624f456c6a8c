//! Consumption of finished pre-trees into the packed forest.
//!
//! Trees arrive in blocks; each is consumed into per-tree scratch
//! triples in tree-index order, which also fixes the origin offsets.
//! Finalization concatenates the scratch into the contiguous forest
//! arrays, prefix-sums the factor-bit offsets, and scales the
//! per-predictor information totals by the tree count.

use tracing::debug;

use crate::bag::BagMap;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::pretree::PreTree;
use crate::session::Session;

struct TreeScratch {
    pred: Vec<i32>,
    num: Vec<f64>,
    bump: Vec<i32>,
    fac: Vec<u32>,
}

/// Accumulates consumed trees until the forest is finalized.
pub(crate) struct ForestBuilder {
    session: Session,
    ctg_width: usize,
    scratch: Vec<TreeScratch>,
    tree_origin: Vec<i32>,
    forest_size: usize,
    bag: BagMap,
    pred_info: Vec<f64>,
    max_height: usize,
}

impl ForestBuilder {
    pub fn new(session: Session, ctg_width: usize) -> Self {
        Self {
            session,
            ctg_width,
            scratch: Vec::with_capacity(session.n_tree()),
            tree_origin: Vec::with_capacity(session.n_tree()),
            forest_size: 0,
            bag: BagMap::new(session.n_tree(), session.n_row()),
            pred_info: vec![0.0; session.n_pred()],
            max_height: 0,
        }
    }

    /// Consume a block of finished pre-trees, in tree order.
    ///
    /// Each pre-tree's leaf scores are written first, then the node
    /// triple and factor bits, then its in-bag rows join the global bag
    /// matrix. The pre-tree is dropped on the way out.
    pub fn block_consume(&mut self, block: Vec<PreTree>, tree_start: usize) {
        for (block_idx, mut pt) in block.into_iter().enumerate() {
            let tree = tree_start + block_idx;
            let height = pt.height();

            let mut pred = vec![0i32; height];
            let mut num = vec![0f64; height];
            let mut bump = vec![0i32; height];
            pt.sample().scores(pt.sample_to_pt(), height, &mut num);
            pt.consume_nodes(&mut pred, &mut num, &mut bump);
            let fac = pt.consume_split_bits();
            pt.accumulate_info(&mut self.pred_info);
            self.bag.ingest(tree, pt.in_bag());

            debug!(
                tree,
                height,
                leaves = pt.leaf_count(),
                fac_width = fac.len(),
                "pre-tree consumed"
            );

            self.tree_origin.push(self.forest_size as i32);
            self.forest_size += height;
            self.max_height = self.max_height.max(height);
            self.scratch.push(TreeScratch {
                pred,
                num,
                bump,
                fac,
            });
        }
    }

    /// Largest tree height consumed so far, for height-estimate refinement.
    pub fn max_height(&self) -> usize {
        self.max_height
    }

    /// Concatenate the per-tree scratch into the packed forest.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::CorruptForest`] if the assembled arrays
    /// violate the packed invariants, which would indicate a consumption
    /// bug rather than caller error.
    pub fn finalize(self) -> Result<(Forest, BagMap, Vec<f64>), ForestError> {
        let n_tree = self.scratch.len();
        let mut fac_off = Vec::with_capacity(n_tree);
        let mut cum_fac_width = 0usize;
        for tree in &self.scratch {
            fac_off.push(cum_fac_width as i32);
            cum_fac_width += tree.fac.len();
        }

        let mut pred = Vec::with_capacity(self.forest_size);
        let mut num = Vec::with_capacity(self.forest_size);
        let mut bump = Vec::with_capacity(self.forest_size);
        let mut fac_bits = Vec::with_capacity(cum_fac_width);
        for tree in self.scratch {
            pred.extend_from_slice(&tree.pred);
            num.extend_from_slice(&tree.num);
            bump.extend_from_slice(&tree.bump);
            fac_bits.extend_from_slice(&tree.fac);
        }

        let mut pred_info = self.pred_info;
        for info in pred_info.iter_mut() {
            *info /= n_tree as f64;
        }

        let forest = Forest::from_arrays(
            pred,
            num,
            bump,
            self.tree_origin,
            fac_off,
            fac_bits,
            self.session.n_pred_num(),
            self.session.n_pred_fac(),
            self.ctg_width,
        );
        forest.validate()?;

        debug!(
            n_tree,
            forest_size = forest.forest_size(),
            cum_fac_width,
            "forest finalized"
        );
        Ok((forest, self.bag, pred_info))
    }
}
