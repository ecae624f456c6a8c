//! The packed forest: immutable parallel arrays shared by all trees.
//!
//! Each tree occupies a contiguous slice of the `pred` / `num` / `bump`
//! triple starting at its origin. `bump` is the distance from a node to
//! its left child, with zero marking a leaf; the right child sits at
//! `bump + 1`. `num` is deliberately multiplexed: it carries the numeric
//! threshold at numeric splits, the integer offset into the tree's
//! factor-bit region at factor splits, and the leaf score or category at
//! terminals. The factor bits themselves are widened to one word per
//! bit so they index directly.

use crate::error::ForestError;

/// Immutable packed forest plus the shape header the walker needs.
///
/// A `ctg_width` of zero marks a regression forest; otherwise terminals
/// carry category indices.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Forest {
    pub(crate) pred: Vec<i32>,
    pub(crate) num: Vec<f64>,
    pub(crate) bump: Vec<i32>,
    pub(crate) tree_origin: Vec<i32>,
    pub(crate) fac_off: Vec<i32>,
    pub(crate) fac_bits: Vec<u32>,
    pub(crate) n_pred_num: usize,
    pub(crate) n_pred_fac: usize,
    pub(crate) ctg_width: usize,
}

impl Forest {
    /// Assemble a forest from its packed arrays.
    ///
    /// No validation happens here; prediction entry points and model
    /// loading call [`Forest::validate`] before walking.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_arrays(
        pred: Vec<i32>,
        num: Vec<f64>,
        bump: Vec<i32>,
        tree_origin: Vec<i32>,
        fac_off: Vec<i32>,
        fac_bits: Vec<u32>,
        n_pred_num: usize,
        n_pred_fac: usize,
        ctg_width: usize,
    ) -> Self {
        Self {
            pred,
            num,
            bump,
            tree_origin,
            fac_off,
            fac_bits,
            n_pred_num,
            n_pred_fac,
            ctg_width,
        }
    }

    /// Return the tree count.
    #[must_use]
    pub fn n_tree(&self) -> usize {
        self.tree_origin.len()
    }

    /// Return the total node count across trees.
    #[must_use]
    pub fn forest_size(&self) -> usize {
        self.pred.len()
    }

    /// Return the numeric predictor count the forest was trained with.
    #[must_use]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    /// Return the factor predictor count the forest was trained with.
    #[must_use]
    pub fn n_pred_fac(&self) -> usize {
        self.n_pred_fac
    }

    /// Return the total predictor count.
    #[must_use]
    pub fn n_pred(&self) -> usize {
        self.n_pred_num + self.n_pred_fac
    }

    /// Return the response cardinality; zero for regression.
    #[must_use]
    pub fn ctg_width(&self) -> usize {
        self.ctg_width
    }

    /// Starting node offset of a tree.
    #[inline]
    #[must_use]
    pub fn tree_origin(&self, tree: usize) -> usize {
        self.tree_origin[tree] as usize
    }

    /// Starting factor-bit offset of a tree.
    #[inline]
    pub(crate) fn fac_origin(&self, tree: usize) -> usize {
        self.fac_off[tree] as usize
    }

    /// Node count of a tree.
    #[must_use]
    pub fn tree_size(&self, tree: usize) -> usize {
        let next = if tree + 1 < self.tree_origin.len() {
            self.tree_origin[tree + 1] as usize
        } else {
            self.pred.len()
        };
        next - self.tree_origin(tree)
    }

    /// Leaf count of a tree.
    #[must_use]
    pub fn leaf_count(&self, tree: usize) -> usize {
        let origin = self.tree_origin(tree);
        self.bump[origin..origin + self.tree_size(tree)]
            .iter()
            .filter(|&&b| b == 0)
            .count()
    }

    /// Check the structural invariants of the packed representation.
    ///
    /// Violations indicate a corrupt or truncated model and are fatal to
    /// any walk, so prediction and loading both call this first.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::CorruptForest`] naming the first violated
    /// invariant.
    pub fn validate(&self) -> Result<(), ForestError> {
        let forest_size = self.pred.len();
        if self.num.len() != forest_size || self.bump.len() != forest_size {
            return Err(ForestError::CorruptForest {
                detail: format!(
                    "array lengths diverge: pred {}, num {}, bump {}",
                    forest_size,
                    self.num.len(),
                    self.bump.len()
                ),
            });
        }
        let n_tree = self.tree_origin.len();
        if n_tree == 0 || forest_size == 0 {
            return Err(ForestError::CorruptForest {
                detail: "empty forest".to_string(),
            });
        }
        if self.fac_off.len() != n_tree {
            return Err(ForestError::CorruptForest {
                detail: format!(
                    "factor offsets cover {} trees, expected {n_tree}",
                    self.fac_off.len()
                ),
            });
        }
        if self.tree_origin[0] != 0 {
            return Err(ForestError::CorruptForest {
                detail: format!("first tree origin {} is nonzero", self.tree_origin[0]),
            });
        }

        let n_pred = self.n_pred() as i32;
        for tree in 0..n_tree {
            let origin = self.tree_origin(tree);
            let size = if tree + 1 < n_tree {
                let next = self.tree_origin[tree + 1] as usize;
                if next <= origin || next > forest_size {
                    return Err(ForestError::CorruptForest {
                        detail: format!("tree {tree} origin order violated at {next}"),
                    });
                }
                next - origin
            } else {
                forest_size - origin
            };

            let fac_start = self.fac_off[tree];
            let fac_end = if tree + 1 < n_tree {
                self.fac_off[tree + 1]
            } else {
                self.fac_bits.len() as i32
            };
            if fac_start < 0 || fac_end < fac_start || fac_end as usize > self.fac_bits.len() {
                return Err(ForestError::CorruptForest {
                    detail: format!("tree {tree} factor region [{fac_start}, {fac_end}) invalid"),
                });
            }

            for local in 0..size {
                let at = origin + local;
                let bump = self.bump[at];
                if bump == 0 {
                    continue;
                }
                if bump < 0 {
                    return Err(ForestError::CorruptForest {
                        detail: format!("negative bump {bump} at node {at}"),
                    });
                }
                let rh = local + bump as usize + 1;
                if rh >= size {
                    return Err(ForestError::CorruptForest {
                        detail: format!(
                            "node {at} bump {bump} escapes tree {tree} of size {size}"
                        ),
                    });
                }
                let pred = self.pred[at];
                if pred < 0 || pred >= n_pred {
                    return Err(ForestError::CorruptForest {
                        detail: format!("node {at} predictor {pred} outside [0, {n_pred})"),
                    });
                }
                if pred as usize >= self.n_pred_num {
                    let bit_off = self.num[at];
                    let width = (fac_end - fac_start) as f64;
                    if !(bit_off >= 0.0 && bit_off < width) {
                        return Err(ForestError::CorruptForest {
                            detail: format!(
                                "node {at} factor bit offset {bit_off} outside region width {width}"
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
