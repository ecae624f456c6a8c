//! Bulk descent over the packed forest.
//!
//! The walk is specialized along the predictor-type axis so the
//! numeric-only inner loop carries no factor branch and vice versa; the
//! mixed loop branches per node but stays branch-predictable along a
//! root-to-leaf path. Crossed with the two consumers (leaf recording
//! for regression, census bumping for classification) this yields six
//! monomorphic inner loops.
//!
//! Rows are walked in parallel. Per-row predictor gathers land in
//! disjoint chunks of a single transpose slab, so workers share no
//! mutable state.
//!
//! Numeric tie policy: equality descends left. Factor levels without a
//! bit in the split's region descend right, which also covers levels
//! unseen at training time.

use rayon::prelude::*;

use crate::bag::BagMap;
use crate::forest::Forest;
use crate::session::PredictorTable;

/// Leaf sentinel for a tree skipped under the bag policy.
pub(crate) const LEAF_SKIPPED: i32 = -1;

#[inline]
fn descend_num(pred: &[i32], num: &[f64], bump: &[i32], row_num: &[f64]) -> usize {
    let mut idx = 0usize;
    let mut b = bump[0];
    while b != 0 {
        let p = pred[idx] as usize;
        idx += if row_num[p] <= num[idx] {
            b as usize
        } else {
            b as usize + 1
        };
        b = bump[idx];
    }
    idx
}

#[inline]
fn descend_fac(
    pred: &[i32],
    num: &[f64],
    bump: &[i32],
    fac_bits: &[u32],
    row_fac: &[u32],
    n_pred_num: usize,
) -> usize {
    let mut idx = 0usize;
    let mut b = bump[0];
    while b != 0 {
        let p = pred[idx] as usize;
        let bit_off = num[idx] as usize;
        let level = row_fac[p - n_pred_num] as usize;
        let goes_left = fac_bits.get(bit_off + level).is_some_and(|&bit| bit != 0);
        idx += if goes_left { b as usize } else { b as usize + 1 };
        b = bump[idx];
    }
    idx
}

#[inline]
fn descend_mixed(
    pred: &[i32],
    num: &[f64],
    bump: &[i32],
    fac_bits: &[u32],
    row_num: &[f64],
    row_fac: &[u32],
    n_pred_num: usize,
) -> usize {
    let mut idx = 0usize;
    let mut b = bump[0];
    while b != 0 {
        let p = pred[idx] as usize;
        let goes_left = if p < n_pred_num {
            row_num[p] <= num[idx]
        } else {
            let bit_off = num[idx] as usize;
            let level = row_fac[p - n_pred_num] as usize;
            fac_bits.get(bit_off + level).is_some_and(|&bit| bit != 0)
        };
        idx += if goes_left { b as usize } else { b as usize + 1 };
        b = bump[idx];
    }
    idx
}

struct TreeSlices<'a> {
    pred: &'a [i32],
    num: &'a [f64],
    bump: &'a [i32],
    fac: &'a [u32],
}

#[inline]
fn tree_slices(forest: &Forest, tree: usize) -> TreeSlices<'_> {
    let origin = forest.tree_origin(tree);
    let size = forest.tree_size(tree);
    let fac_start = forest.fac_origin(tree);
    let fac_end = if tree + 1 < forest.n_tree() {
        forest.fac_origin(tree + 1)
    } else {
        forest.fac_bits.len()
    };
    TreeSlices {
        pred: &forest.pred[origin..origin + size],
        num: &forest.num[origin..origin + size],
        bump: &forest.bump[origin..origin + size],
        fac: &forest.fac_bits[fac_start..fac_end],
    }
}

/// Walk every `(row, tree)` pair to its leaf, recording per-row leaf
/// offsets; in-bag trees record [`LEAF_SKIPPED`] under the bag policy.
pub(crate) fn predict_leaves(
    forest: &Forest,
    table: &PredictorTable,
    bag: Option<&BagMap>,
) -> Vec<i32> {
    let n_row = table.n_row();
    let n_tree = forest.n_tree();
    let mut leaves = vec![0i32; n_row * n_tree];
    if forest.n_pred_fac() == 0 {
        leaves_num(forest, table, bag, &mut leaves);
    } else if forest.n_pred_num() == 0 {
        leaves_fac(forest, table, bag, &mut leaves);
    } else {
        leaves_mixed(forest, table, bag, &mut leaves);
    }
    leaves
}

fn leaves_num(forest: &Forest, table: &PredictorTable, bag: Option<&BagMap>, leaves: &mut [i32]) {
    let n_num = table.n_pred_num();
    let n_tree = forest.n_tree();
    let mut slab = vec![0.0f64; table.n_row() * n_num];
    slab.par_chunks_mut(n_num)
        .zip(leaves.par_chunks_mut(n_tree))
        .enumerate()
        .for_each(|(row, (row_num, row_leaves))| {
            for col in 0..n_num {
                row_num[col] = table.num_value(row, col);
            }
            for tree in 0..n_tree {
                if let Some(bag) = bag
                    && bag.test(tree, row)
                {
                    row_leaves[tree] = LEAF_SKIPPED;
                    continue;
                }
                let t = tree_slices(forest, tree);
                row_leaves[tree] = descend_num(t.pred, t.num, t.bump, row_num) as i32;
            }
        });
}

fn leaves_fac(forest: &Forest, table: &PredictorTable, bag: Option<&BagMap>, leaves: &mut [i32]) {
    let n_fac = table.n_pred_fac();
    let n_tree = forest.n_tree();
    let mut slab = vec![0u32; table.n_row() * n_fac];
    slab.par_chunks_mut(n_fac)
        .zip(leaves.par_chunks_mut(n_tree))
        .enumerate()
        .for_each(|(row, (row_fac, row_leaves))| {
            for col in 0..n_fac {
                row_fac[col] = table.fac_value(row, col);
            }
            for tree in 0..n_tree {
                if let Some(bag) = bag
                    && bag.test(tree, row)
                {
                    row_leaves[tree] = LEAF_SKIPPED;
                    continue;
                }
                let t = tree_slices(forest, tree);
                row_leaves[tree] =
                    descend_fac(t.pred, t.num, t.bump, t.fac, row_fac, 0) as i32;
            }
        });
}

fn leaves_mixed(forest: &Forest, table: &PredictorTable, bag: Option<&BagMap>, leaves: &mut [i32]) {
    let n_num = table.n_pred_num();
    let n_fac = table.n_pred_fac();
    let n_tree = forest.n_tree();
    let mut slab_num = vec![0.0f64; table.n_row() * n_num];
    let mut slab_fac = vec![0u32; table.n_row() * n_fac];
    slab_num
        .par_chunks_mut(n_num)
        .zip(slab_fac.par_chunks_mut(n_fac))
        .zip(leaves.par_chunks_mut(n_tree))
        .enumerate()
        .for_each(|(row, ((row_num, row_fac), row_leaves))| {
            for col in 0..n_num {
                row_num[col] = table.num_value(row, col);
            }
            for col in 0..n_fac {
                row_fac[col] = table.fac_value(row, col);
            }
            for tree in 0..n_tree {
                if let Some(bag) = bag
                    && bag.test(tree, row)
                {
                    row_leaves[tree] = LEAF_SKIPPED;
                    continue;
                }
                let t = tree_slices(forest, tree);
                row_leaves[tree] =
                    descend_mixed(t.pred, t.num, t.bump, t.fac, row_num, row_fac, n_num) as i32;
            }
        });
}

/// Walk every `(row, tree)` pair and bump the row's census at the leaf
/// category; in-bag trees contribute nothing under the bag policy.
pub(crate) fn predict_census(
    forest: &Forest,
    table: &PredictorTable,
    bag: Option<&BagMap>,
) -> Vec<u32> {
    let n_row = table.n_row();
    let ctg_width = forest.ctg_width();
    let mut census = vec![0u32; n_row * ctg_width];
    if forest.n_pred_fac() == 0 {
        census_num(forest, table, bag, &mut census);
    } else if forest.n_pred_num() == 0 {
        census_fac(forest, table, bag, &mut census);
    } else {
        census_mixed(forest, table, bag, &mut census);
    }
    census
}

fn census_num(forest: &Forest, table: &PredictorTable, bag: Option<&BagMap>, census: &mut [u32]) {
    let n_num = table.n_pred_num();
    let n_tree = forest.n_tree();
    let ctg_width = forest.ctg_width();
    let mut slab = vec![0.0f64; table.n_row() * n_num];
    slab.par_chunks_mut(n_num)
        .zip(census.par_chunks_mut(ctg_width))
        .enumerate()
        .for_each(|(row, (row_num, row_census))| {
            for col in 0..n_num {
                row_num[col] = table.num_value(row, col);
            }
            for tree in 0..n_tree {
                if let Some(bag) = bag
                    && bag.test(tree, row)
                {
                    continue;
                }
                let t = tree_slices(forest, tree);
                let leaf = descend_num(t.pred, t.num, t.bump, row_num);
                row_census[t.num[leaf] as usize] += 1;
            }
        });
}

fn census_fac(forest: &Forest, table: &PredictorTable, bag: Option<&BagMap>, census: &mut [u32]) {
    let n_fac = table.n_pred_fac();
    let n_tree = forest.n_tree();
    let ctg_width = forest.ctg_width();
    let mut slab = vec![0u32; table.n_row() * n_fac];
    slab.par_chunks_mut(n_fac)
        .zip(census.par_chunks_mut(ctg_width))
        .enumerate()
        .for_each(|(row, (row_fac, row_census))| {
            for col in 0..n_fac {
                row_fac[col] = table.fac_value(row, col);
            }
            for tree in 0..n_tree {
                if let Some(bag) = bag
                    && bag.test(tree, row)
                {
                    continue;
                }
                let t = tree_slices(forest, tree);
                let leaf = descend_fac(t.pred, t.num, t.bump, t.fac, row_fac, 0);
                row_census[t.num[leaf] as usize] += 1;
            }
        });
}

fn census_mixed(forest: &Forest, table: &PredictorTable, bag: Option<&BagMap>, census: &mut [u32]) {
    let n_num = table.n_pred_num();
    let n_fac = table.n_pred_fac();
    let n_tree = forest.n_tree();
    let ctg_width = forest.ctg_width();
    let mut slab_num = vec![0.0f64; table.n_row() * n_num];
    let mut slab_fac = vec![0u32; table.n_row() * n_fac];
    slab_num
        .par_chunks_mut(n_num)
        .zip(slab_fac.par_chunks_mut(n_fac))
        .zip(census.par_chunks_mut(ctg_width))
        .enumerate()
        .for_each(|(row, ((row_num, row_fac), row_census))| {
            for col in 0..n_num {
                row_num[col] = table.num_value(row, col);
            }
            for col in 0..n_fac {
                row_fac[col] = table.fac_value(row, col);
            }
            for tree in 0..n_tree {
                if let Some(bag) = bag
                    && bag.test(tree, row)
                {
                    continue;
                }
                let t = tree_slices(forest, tree);
                let leaf =
                    descend_mixed(t.pred, t.num, t.bump, t.fac, row_num, row_fac, n_num);
                row_census[t.num[leaf] as usize] += 1;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::{predict_census, predict_leaves};
    use crate::bag::BagMap;
    use crate::forest::Forest;
    use crate::session::PredictorTable;

    /// One tree, one numeric predictor, root split at 0.5.
    fn numeric_forest() -> Forest {
        Forest::from_arrays(
            vec![0, 0, 0],
            vec![0.5, 10.0, 20.0],
            vec![1, 0, 0],
            vec![0],
            vec![0],
            vec![],
            1,
            0,
            0,
        )
    }

    /// One tree, one factor predictor of cardinality 3; level 1 goes left.
    fn factor_forest(ctg_width: usize) -> Forest {
        Forest::from_arrays(
            vec![0, 0, 0],
            vec![0.0, 1.0, 0.0],
            vec![1, 0, 0],
            vec![0],
            vec![0],
            vec![0, 1, 0],
            0,
            1,
            ctg_width,
        )
    }

    #[test]
    fn numeric_descent_finds_leaves() {
        let forest = numeric_forest();
        let table =
            PredictorTable::from_columns(vec![vec![0.3, 0.7]], vec![]).unwrap();
        let leaves = predict_leaves(&forest, &table, None);
        assert_eq!(leaves, vec![1, 2]);
    }

    #[test]
    fn numeric_tie_goes_left() {
        let forest = numeric_forest();
        let table = PredictorTable::from_columns(vec![vec![0.5]], vec![]).unwrap();
        let leaves = predict_leaves(&forest, &table, None);
        assert_eq!(leaves, vec![1]);
    }

    #[test]
    fn factor_descent_tests_level_bit() {
        let forest = factor_forest(0);
        let table =
            PredictorTable::from_columns(vec![], vec![vec![1, 0, 2, 1]]).unwrap();
        let leaves = predict_leaves(&forest, &table, None);
        assert_eq!(leaves, vec![1, 2, 2, 1]);
    }

    #[test]
    fn unseen_factor_level_goes_right() {
        let forest = factor_forest(0);
        // Level 7 was never seen at training; its bit is absent.
        let table = PredictorTable::from_columns(vec![], vec![vec![7]]).unwrap();
        let leaves = predict_leaves(&forest, &table, None);
        assert_eq!(leaves, vec![2]);
    }

    #[test]
    fn bag_skips_in_bag_trees() {
        let forest = numeric_forest();
        let table =
            PredictorTable::from_columns(vec![vec![0.3, 0.7]], vec![]).unwrap();
        let mut bag = BagMap::new(1, 2);
        bag.set(0, 0);
        let leaves = predict_leaves(&forest, &table, Some(&bag));
        assert_eq!(leaves, vec![-1, 2]);
    }

    #[test]
    fn census_counts_leaf_categories() {
        let forest = factor_forest(2);
        let table =
            PredictorTable::from_columns(vec![], vec![vec![1, 0, 1]]).unwrap();
        let census = predict_census(&forest, &table, None);
        // Leaf 1 carries category 1, leaf 2 category 0.
        assert_eq!(census, vec![0, 1, 1, 0, 0, 1]);
    }

    #[test]
    fn mixed_descent_branches_per_node() {
        // Tree: root numeric split at 0.5; left child is a factor split
        // (level 0 goes left), right child a leaf.
        //   node0: num pred 0, bump 1
        //   node1: fac pred 1 (bit offset 0), bump 2
        //   node2: leaf 9.0
        //   node3: leaf 1.0
        //   node4: leaf 2.0
        let forest = Forest::from_arrays(
            vec![0, 1, 0, 0, 0],
            vec![0.5, 0.0, 9.0, 1.0, 2.0],
            vec![1, 2, 0, 0, 0],
            vec![0],
            vec![0],
            vec![1, 0],
            1,
            1,
            0,
        );
        forest.validate().unwrap();
        let table = PredictorTable::from_columns(
            vec![vec![0.4, 0.4, 0.6]],
            vec![vec![0, 1, 0]],
        )
        .unwrap();
        let leaves = predict_leaves(&forest, &table, None);
        assert_eq!(leaves, vec![3, 4, 2]);
    }
}
