//! Training orchestration.
//!
//! Trees are grown in blocks: within a block every tree grows on its own
//! worker with its own seeded RNG, bag, staged views, and level-local
//! candidate table; consumption into the packed forest is serialized in
//! tree order at the block boundary, which also fixes the origin
//! offsets and keeps output byte-identical for a given seed.
//!
//! A single tree grows breadth-first. Each level scores candidates for
//! every splitable node into the level's signature table, takes the
//! argmax per node under its gain floor, applies the winners to the
//! pre-tree (replaying children onto the sample map), and restages the
//! per-predictor views for the next level.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::bag::BagMap;
use crate::builder::ForestBuilder;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::pretree::{HeightEstimate, PreTree};
use crate::sample::{Response, Sample};
use crate::session::{PredictorTable, Session};
use crate::splitsig::SplitSig;
use crate::splitter::{RunSet, Splitter};
use crate::stage::{RestageExtent, RowRank, SamplePred};

/// Configuration for forest training.
///
/// Construct via [`TrainConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter          | Default                    |
/// |--------------------|----------------------------|
/// | `train_block`      | 8                          |
/// | `min_node`         | 2                          |
/// | `min_ratio`        | 0.0                        |
/// | `tot_levels`       | 0 (unlimited)              |
/// | `pred_fixed`       | `None` (all predictors)    |
/// | `pred_prob`        | `None`                     |
/// | `n_samp`           | `None` (one per row)       |
/// | `with_replacement` | `true`                     |
/// | `sample_weights`   | `None` (uniform)           |
/// | `seed`             | 42                         |
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub(crate) n_tree: usize,
    pub(crate) train_block: usize,
    pub(crate) min_node: usize,
    pub(crate) min_ratio: f64,
    pub(crate) tot_levels: usize,
    pub(crate) pred_fixed: Option<usize>,
    pub(crate) pred_prob: Option<Vec<f64>>,
    pub(crate) n_samp: Option<usize>,
    pub(crate) with_replacement: bool,
    pub(crate) sample_weights: Option<Vec<f64>>,
    pub(crate) seed: u64,
}

impl TrainConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_tree` is zero.
    pub fn new(n_tree: usize) -> Result<Self, ForestError> {
        if n_tree == 0 {
            return Err(ForestError::InvalidTreeCount { n_tree });
        }
        Ok(Self {
            n_tree,
            train_block: 8,
            min_node: 2,
            min_ratio: 0.0,
            tot_levels: 0,
            pred_fixed: None,
            pred_prob: None,
            n_samp: None,
            with_replacement: true,
            sample_weights: None,
            seed: 42,
        })
    }

    // --- Setters ---

    /// Set the number of trees consumed per block.
    #[must_use]
    pub fn with_train_block(mut self, train_block: usize) -> Self {
        self.train_block = train_block;
        self
    }

    /// Set the minimal sample count on either side of a split.
    #[must_use]
    pub fn with_min_node(mut self, min_node: usize) -> Self {
        self.min_node = min_node;
        self
    }

    /// Set the minimal child-to-parent information ratio for a split.
    #[must_use]
    pub fn with_min_ratio(mut self, min_ratio: f64) -> Self {
        self.min_ratio = min_ratio;
        self
    }

    /// Set the level cap; zero grows until nothing splits.
    #[must_use]
    pub fn with_tot_levels(mut self, tot_levels: usize) -> Self {
        self.tot_levels = tot_levels;
        self
    }

    /// Set a fixed candidate-predictor count per node.
    #[must_use]
    pub fn with_pred_fixed(mut self, pred_fixed: Option<usize>) -> Self {
        self.pred_fixed = pred_fixed;
        self
    }

    /// Set per-predictor candidacy probabilities.
    #[must_use]
    pub fn with_pred_prob(mut self, pred_prob: Option<Vec<f64>>) -> Self {
        self.pred_prob = pred_prob;
        self
    }

    /// Set the per-tree sample draw count; `None` draws one per row.
    #[must_use]
    pub fn with_n_samp(mut self, n_samp: Option<usize>) -> Self {
        self.n_samp = n_samp;
        self
    }

    /// Set whether bagging draws with replacement.
    #[must_use]
    pub fn with_replacement(mut self, with_replacement: bool) -> Self {
        self.with_replacement = with_replacement;
        self
    }

    /// Set per-row sampling weights; requires replacement.
    #[must_use]
    pub fn with_sample_weights(mut self, sample_weights: Option<Vec<f64>>) -> Self {
        self.sample_weights = sample_weights;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_tree(&self) -> usize {
        self.n_tree
    }

    /// Return the block size.
    #[must_use]
    pub fn train_block(&self) -> usize {
        self.train_block
    }

    /// Return the minimal per-side sample count.
    #[must_use]
    pub fn min_node(&self) -> usize {
        self.min_node
    }

    /// Return the minimal information ratio.
    #[must_use]
    pub fn min_ratio(&self) -> f64 {
        self.min_ratio
    }

    /// Return the level cap (zero means unlimited).
    #[must_use]
    pub fn tot_levels(&self) -> usize {
        self.tot_levels
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn validate(&self, table: &PredictorTable, response: &Response) -> Result<(), ForestError> {
        let n_row = table.n_row();
        if response.len() != n_row {
            return Err(ForestError::ResponseLengthMismatch {
                expected: n_row,
                got: response.len(),
            });
        }
        if self.train_block == 0 {
            return Err(ForestError::InvalidTrainBlock {
                train_block: self.train_block,
            });
        }
        if self.min_node == 0 {
            return Err(ForestError::InvalidMinNode {
                min_node: self.min_node,
            });
        }
        if !self.min_ratio.is_finite() || self.min_ratio < 0.0 {
            return Err(ForestError::InvalidMinRatio {
                min_ratio: self.min_ratio,
            });
        }
        let n_samp = self.n_samp.unwrap_or(n_row);
        if n_samp == 0 || (!self.with_replacement && n_samp > n_row) {
            return Err(ForestError::InvalidSampleCount {
                n_samp,
                n_row,
                with_replacement: self.with_replacement,
            });
        }
        let n_pred = table.n_pred();
        if let Some(pred_fixed) = self.pred_fixed
            && (pred_fixed == 0 || pred_fixed > n_pred)
        {
            return Err(ForestError::InvalidPredFixed { pred_fixed, n_pred });
        }
        if let Some(probs) = &self.pred_prob
            && (probs.len() != n_pred
                || probs.iter().any(|&p| !(0.0..=1.0).contains(&p)))
        {
            return Err(ForestError::InvalidPredProb { n_pred });
        }
        if let Some(weights) = &self.sample_weights {
            if !self.with_replacement {
                return Err(ForestError::WeightedWithoutReplacement);
            }
            if weights.len() != n_row
                || weights.iter().any(|&w| !w.is_finite() || w < 0.0)
            {
                return Err(ForestError::InvalidSampleWeights { n_row });
            }
        }
        Ok(())
    }

    /// Train a forest on the provided table and response.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ResponseLengthMismatch`] | response shorter or longer than the table |
    /// | [`ForestError::InvalidTrainBlock`] | zero block size |
    /// | [`ForestError::InvalidMinNode`] | zero min_node |
    /// | [`ForestError::InvalidMinRatio`] | negative or non-finite min_ratio |
    /// | [`ForestError::InvalidSampleCount`] | degenerate n_samp |
    /// | [`ForestError::InvalidPredFixed`] | pred_fixed outside [1, n_pred] |
    /// | [`ForestError::InvalidPredProb`] | malformed pred_prob |
    /// | [`ForestError::WeightedWithoutReplacement`] | weights without replacement |
    /// | [`ForestError::InvalidSampleWeights`] | malformed weights |
    pub fn fit(
        &self,
        table: &PredictorTable,
        response: &Response,
    ) -> Result<TrainResult, ForestError> {
        train(self, table, response)
    }
}

/// Metadata about the training run.
#[derive(Debug, Clone)]
pub struct TrainMetadata {
    /// Number of trees trained.
    pub n_tree: usize,
    /// Number of training rows.
    pub n_row: usize,
    /// Numeric predictor count.
    pub n_pred_num: usize,
    /// Factor predictor count.
    pub n_pred_fac: usize,
    /// Response cardinality; zero for regression.
    pub ctg_width: usize,
    /// Total node count across trees.
    pub forest_size: usize,
}

/// Result of forest training: the packed forest, its bag matrix, and
/// the per-predictor information totals.
#[derive(Debug)]
pub struct TrainResult {
    forest: Forest,
    bag: BagMap,
    pred_info: Vec<f64>,
    metadata: TrainMetadata,
}

impl TrainResult {
    /// Borrow the packed forest.
    #[must_use]
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// Borrow the bag matrix.
    #[must_use]
    pub fn bag(&self) -> &BagMap {
        &self.bag
    }

    /// Return the per-predictor information totals, scaled by tree count.
    #[must_use]
    pub fn pred_info(&self) -> &[f64] {
        &self.pred_info
    }

    /// Return training metadata.
    #[must_use]
    pub fn metadata(&self) -> &TrainMetadata {
        &self.metadata
    }

    /// Consume the result into its parts without copying the arrays.
    #[must_use]
    pub fn into_parts(self) -> (Forest, BagMap, Vec<f64>) {
        (self.forest, self.bag, self.pred_info)
    }

    /// Consume the result and return the packed forest.
    #[must_use]
    pub fn into_forest(self) -> Forest {
        self.forest
    }
}

/// One active node of the level under construction.
#[derive(Debug, Clone, Copy)]
struct LevelNode {
    pt_id: u32,
    start: usize,
    end: usize,
    sum: f64,
    s_count: u32,
    gain_floor: f64,
}

/// Select the candidate predictors for one node, in index order.
fn select_preds(
    cfg: &TrainConfig,
    n_pred: usize,
    rng: &mut ChaCha8Rng,
    selected: &mut Vec<usize>,
    order: &mut Vec<usize>,
) {
    selected.clear();
    if let Some(probs) = &cfg.pred_prob {
        for (pred, &prob) in probs.iter().enumerate() {
            if rng.r#gen::<f64>() < prob {
                selected.push(pred);
            }
        }
    } else if let Some(pred_fixed) = cfg.pred_fixed {
        order.clear();
        order.extend(0..n_pred);
        for i in 0..pred_fixed {
            let j = rng.gen_range(i..n_pred);
            order.swap(i, j);
        }
        selected.extend_from_slice(&order[..pred_fixed]);
        selected.sort_unstable();
    } else {
        selected.extend(0..n_pred);
    }
}

/// Grow one pre-tree to completion.
fn grow_tree(
    seed: u64,
    table: &PredictorTable,
    row_rank: &RowRank,
    response: &Response,
    cfg: &TrainConfig,
    n_samp: usize,
    height_est: usize,
) -> PreTree {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n_pred = table.n_pred();
    let n_pred_num = table.n_pred_num();
    let max_fac_card = table.max_fac_card();

    let (sample, in_bag) = Sample::bag(
        response,
        cfg.sample_weights.as_deref(),
        n_samp,
        cfg.with_replacement,
        &mut rng,
    );
    let bag_count = sample.bag_count();
    let bag_sum = sample.bag_sum();
    let s_count_total = sample.s_count_total();
    let mut pre_tree = PreTree::new(
        sample,
        in_bag,
        height_est,
        max_fac_card,
        table.n_pred_fac() > 0,
    );
    let mut sample_pred = SamplePred::stage(pre_tree.sample(), row_rank, table);
    let mut splitter = Splitter::new(cfg.min_node, response.ctg_width());
    let mut sig = SplitSig::new(n_pred);
    let mut run_set = RunSet::default();
    let mut selected = Vec::with_capacity(n_pred);
    let mut order = Vec::with_capacity(n_pred);

    let mut nodes = vec![LevelNode {
        pt_id: 0,
        start: 0,
        end: bag_count - 1,
        sum: bag_sum,
        s_count: s_count_total,
        gain_floor: 0.0,
    }];

    let mut level = 0usize;
    while !nodes.is_empty() {
        if cfg.tot_levels != 0 && level >= cfg.tot_levels {
            break;
        }
        let source_bit = level & 1;
        sig.level_init(nodes.len());
        run_set.clear();

        for (level_idx, node) in nodes.iter().enumerate() {
            if (node.s_count as usize) < 2 * cfg.min_node || node.start == node.end {
                continue;
            }
            select_preds(cfg, n_pred, &mut rng, &mut selected, &mut order);
            for &pred in &selected {
                let extent = sample_pred.extent(pred, source_bit, node.start, node.end);
                if pred < n_pred_num {
                    if let Some(cand) = splitter.split_num(extent, node.sum, node.s_count) {
                        sig.write(
                            level_idx,
                            pred as u32,
                            -1,
                            cand.lh_s_count,
                            cand.lh_idx_count,
                            cand.info,
                        );
                    }
                } else if let Some(cand) =
                    splitter.split_fac(extent, node.start, node.sum, node.s_count)
                {
                    let set_idx = run_set.push(cand.slots);
                    sig.write(
                        level_idx,
                        pred as u32,
                        set_idx,
                        cand.lh_s_count,
                        cand.lh_idx_count,
                        cand.info,
                    );
                }
            }
        }

        pre_tree.reserve_level(nodes.len(), max_fac_card);

        let mut next = Vec::new();
        let mut parents: Vec<RestageExtent> = Vec::new();
        for (level_idx, node) in nodes.iter().enumerate() {
            let Some(ss) = sig.arg_max(level_idx, node.gain_floor) else {
                continue;
            };
            let (lh_sum, pt_lh, pt_rh) = ss.non_terminal(
                &sample_pred,
                &mut pre_tree,
                &run_set,
                row_rank,
                table,
                source_bit,
                node.start,
                node.end,
                node.pt_id,
            );
            let lh_end = node.start + ss.lh_idx_count as usize - 1;
            let gain_floor = cfg.min_ratio * ss.info;
            next.push(LevelNode {
                pt_id: pt_lh,
                start: node.start,
                end: lh_end,
                sum: lh_sum,
                s_count: ss.s_count,
                gain_floor,
            });
            next.push(LevelNode {
                pt_id: pt_rh,
                start: lh_end + 1,
                end: node.end,
                sum: node.sum - lh_sum,
                s_count: node.s_count - ss.s_count,
                gain_floor,
            });
            parents.push(RestageExtent {
                start: node.start,
                end: node.end,
                lh_pt: pt_lh,
            });
        }
        sig.level_clear();
        if parents.is_empty() {
            break;
        }
        sample_pred.restage(pre_tree.sample_to_pt(), source_bit, &parents);
        nodes = next;
        level += 1;
    }

    pre_tree
}

/// Block-by-block training driver.
#[instrument(skip_all, fields(n_tree = cfg.n_tree, n_row = table.n_row()))]
pub(crate) fn train(
    cfg: &TrainConfig,
    table: &PredictorTable,
    response: &Response,
) -> Result<TrainResult, ForestError> {
    cfg.validate(table, response)?;
    let n_row = table.n_row();
    let n_samp = cfg.n_samp.unwrap_or(n_row);
    let session = Session::new(
        n_row,
        table.n_pred_num(),
        table.n_pred_fac(),
        cfg.n_tree,
        table.max_fac_card(),
    )?;

    info!(
        n_tree = cfg.n_tree,
        n_row,
        n_pred_num = table.n_pred_num(),
        n_pred_fac = table.n_pred_fac(),
        ctg_width = response.ctg_width(),
        n_samp,
        "training forest"
    );

    let row_rank = RowRank::build(table);
    let mut estimate = HeightEstimate::new(n_samp, cfg.min_node);
    let mut builder = ForestBuilder::new(session, response.ctg_width());

    let mut master_rng = ChaCha8Rng::seed_from_u64(cfg.seed);
    let tree_seeds: Vec<u64> = (0..cfg.n_tree).map(|_| master_rng.r#gen()).collect();

    let mut tree_start = 0usize;
    while tree_start < cfg.n_tree {
        let block_end = (tree_start + cfg.train_block).min(cfg.n_tree);
        let height_est = estimate.get();
        let block: Vec<PreTree> = tree_seeds[tree_start..block_end]
            .par_iter()
            .map(|&seed| {
                grow_tree(seed, table, &row_rank, response, cfg, n_samp, height_est)
            })
            .collect();
        builder.block_consume(block, tree_start);
        estimate.refine(builder.max_height());
        debug!(tree_start, block_end, "block consumed");
        tree_start = block_end;
    }

    let (forest, bag, pred_info) = builder.finalize()?;
    let metadata = TrainMetadata {
        n_tree: cfg.n_tree,
        n_row,
        n_pred_num: table.n_pred_num(),
        n_pred_fac: table.n_pred_fac(),
        ctg_width: response.ctg_width(),
        forest_size: forest.forest_size(),
    };

    info!(
        forest_size = metadata.forest_size,
        "forest training complete"
    );
    Ok(TrainResult {
        forest,
        bag,
        pred_info,
        metadata,
    })
}
