//! Per-level candidate split scoring.
//!
//! For each splitable node and candidate predictor the splitter scans
//! the node's staged extent once and produces at most one candidate:
//! the position (numeric) or run prefix (factor) maximizing the
//! information measure. Information is the sum-of-squares form, which is
//! variance reduction for regression and the Gini mass analogue over
//! class masses for classification; both are nonnegative and zero only
//! for uninformative splits.
//!
//! Factor extents are sorted by level, so each level's samples form a
//! contiguous run. Runs are ordered by mean scalar response and the
//! best prefix of that ordering becomes the left-hand set, the classic
//! reduction of the subset search to a linear scan.

use crate::stage::SpNode;

/// One left-going run of a factor split: the staged extent it occupies
/// and the factor level (`rank`) it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunSlot {
    pub start: usize,
    pub end: usize,
    pub rank: u32,
}

/// Per-level arena of factor-run sets, indexed by the `set_idx` a split
/// signature carries.
#[derive(Debug, Default)]
pub(crate) struct RunSet {
    sets: Vec<Vec<RunSlot>>,
}

impl RunSet {
    pub fn clear(&mut self) {
        self.sets.clear();
    }

    /// Store a candidate's left-hand slots, returning its set index.
    pub fn push(&mut self, slots: Vec<RunSlot>) -> i32 {
        self.sets.push(slots);
        (self.sets.len() - 1) as i32
    }

    /// The left-hand slots of a stored set.
    pub fn lh_slots(&self, set_idx: i32) -> &[RunSlot] {
        &self.sets[set_idx as usize]
    }
}

/// A winning numeric candidate for one `(node, predictor)` pair.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NumCand {
    pub info: f64,
    pub lh_idx_count: u32,
    pub lh_s_count: u32,
}

/// A winning factor candidate for one `(node, predictor)` pair.
#[derive(Debug, Clone)]
pub(crate) struct FacCand {
    pub info: f64,
    pub lh_idx_count: u32,
    pub lh_s_count: u32,
    pub slots: Vec<RunSlot>,
}

/// Stateless scoring over staged extents.
///
/// `min_node` is the minimal sample mass either side of an admissible
/// split; `ctg_width` of zero selects the regression measure.
#[derive(Debug)]
pub(crate) struct Splitter {
    min_node: u32,
    ctg_width: usize,
    ctg_tot: Vec<f64>,
    ctg_lh: Vec<f64>,
}

impl Splitter {
    pub fn new(min_node: usize, ctg_width: usize) -> Self {
        Self {
            min_node: min_node as u32,
            ctg_width,
            ctg_tot: vec![0.0; ctg_width],
            ctg_lh: vec![0.0; ctg_width],
        }
    }

    #[inline]
    fn gini_sum(masses: &[f64], total: f64) -> f64 {
        masses.iter().map(|&m| m * m).sum::<f64>() / total
    }

    /// Score a numeric extent; `None` when no admissible boundary gains.
    pub fn split_num(&mut self, extent: &[SpNode], node_sum: f64, node_s_count: u32) -> Option<NumCand> {
        if extent.len() < 2 {
            return None;
        }

        let node_mass = f64::from(node_s_count);
        let base = if self.ctg_width == 0 {
            node_sum * node_sum / node_mass
        } else {
            for slot in self.ctg_tot.iter_mut() {
                *slot = 0.0;
            }
            for node in extent {
                self.ctg_tot[node.ctg as usize] += f64::from(node.s_count);
            }
            Self::gini_sum(&self.ctg_tot, node_mass)
        };
        for slot in self.ctg_lh.iter_mut() {
            *slot = 0.0;
        }

        let mut best: Option<NumCand> = None;
        let mut best_info = 0.0f64;
        let mut lh_sum = 0.0;
        let mut lh_s_count = 0u32;
        for (i, node) in extent[..extent.len() - 1].iter().enumerate() {
            lh_sum += node.y_sum;
            lh_s_count += node.s_count;
            if self.ctg_width > 0 {
                self.ctg_lh[node.ctg as usize] += f64::from(node.s_count);
            }

            // A boundary only exists between distinct ranks.
            if node.rank == extent[i + 1].rank {
                continue;
            }
            let rh_s_count = node_s_count - lh_s_count;
            if lh_s_count < self.min_node || rh_s_count < self.min_node {
                continue;
            }

            let info = if self.ctg_width == 0 {
                let rh_sum = node_sum - lh_sum;
                lh_sum * lh_sum / f64::from(lh_s_count)
                    + rh_sum * rh_sum / f64::from(rh_s_count)
                    - base
            } else {
                let lh = Self::gini_sum(&self.ctg_lh, f64::from(lh_s_count));
                let rh_masses: Vec<f64> = self
                    .ctg_tot
                    .iter()
                    .zip(&self.ctg_lh)
                    .map(|(&t, &l)| t - l)
                    .collect();
                lh + Self::gini_sum(&rh_masses, f64::from(rh_s_count)) - base
            };

            if info > best_info {
                best_info = info;
                best = Some(NumCand {
                    info,
                    lh_idx_count: (i + 1) as u32,
                    lh_s_count,
                });
            }
        }
        best
    }

    /// Score a factor extent; `None` when fewer than two runs or no
    /// admissible prefix gains.
    ///
    /// `extent_start` is the extent's absolute position in the staged
    /// view, so the returned slots can be replayed directly.
    pub fn split_fac(
        &mut self,
        extent: &[SpNode],
        extent_start: usize,
        node_sum: f64,
        node_s_count: u32,
    ) -> Option<FacCand> {
        struct Run {
            rank: u32,
            start: usize,
            end: usize,
            sum: f64,
            s_count: u32,
            ctg_mass: Vec<f64>,
        }

        let mut runs: Vec<Run> = Vec::new();
        for (pos, node) in extent.iter().enumerate() {
            match runs.last_mut() {
                Some(run) if run.rank == node.rank => {
                    run.end = pos;
                    run.sum += node.y_sum;
                    run.s_count += node.s_count;
                    if self.ctg_width > 0 {
                        run.ctg_mass[node.ctg as usize] += f64::from(node.s_count);
                    }
                }
                _ => {
                    let mut ctg_mass = vec![0.0; self.ctg_width];
                    if self.ctg_width > 0 {
                        ctg_mass[node.ctg as usize] = f64::from(node.s_count);
                    }
                    runs.push(Run {
                        rank: node.rank,
                        start: pos,
                        end: pos,
                        sum: node.y_sum,
                        s_count: node.s_count,
                        ctg_mass,
                    });
                }
            }
        }
        if runs.len() < 2 {
            return None;
        }

        // Mean-response ordering, ties by level for determinism.
        runs.sort_by(|a, b| {
            (a.sum / f64::from(a.s_count))
                .total_cmp(&(b.sum / f64::from(b.s_count)))
                .then(a.rank.cmp(&b.rank))
        });

        let node_mass = f64::from(node_s_count);
        let base = if self.ctg_width == 0 {
            node_sum * node_sum / node_mass
        } else {
            for slot in self.ctg_tot.iter_mut() {
                *slot = 0.0;
            }
            for run in &runs {
                for (tot, mass) in self.ctg_tot.iter_mut().zip(&run.ctg_mass) {
                    *tot += mass;
                }
            }
            Self::gini_sum(&self.ctg_tot, node_mass)
        };
        for slot in self.ctg_lh.iter_mut() {
            *slot = 0.0;
        }

        let mut best_info = 0.0f64;
        let mut best_prefix = 0usize;
        let mut best_lh_s_count = 0u32;
        let mut lh_sum = 0.0;
        let mut lh_s_count = 0u32;
        for (k, run) in runs[..runs.len() - 1].iter().enumerate() {
            lh_sum += run.sum;
            lh_s_count += run.s_count;
            if self.ctg_width > 0 {
                for (acc, mass) in self.ctg_lh.iter_mut().zip(&run.ctg_mass) {
                    *acc += mass;
                }
            }

            let rh_s_count = node_s_count - lh_s_count;
            if lh_s_count < self.min_node || rh_s_count < self.min_node {
                continue;
            }

            let info = if self.ctg_width == 0 {
                let rh_sum = node_sum - lh_sum;
                lh_sum * lh_sum / f64::from(lh_s_count)
                    + rh_sum * rh_sum / f64::from(rh_s_count)
                    - base
            } else {
                let lh = Self::gini_sum(&self.ctg_lh, f64::from(lh_s_count));
                let rh_masses: Vec<f64> = self
                    .ctg_tot
                    .iter()
                    .zip(&self.ctg_lh)
                    .map(|(&t, &l)| t - l)
                    .collect();
                lh + Self::gini_sum(&rh_masses, f64::from(rh_s_count)) - base
            };

            if info > best_info {
                best_info = info;
                best_prefix = k + 1;
                best_lh_s_count = lh_s_count;
            }
        }
        if best_prefix == 0 {
            return None;
        }

        let slots: Vec<RunSlot> = runs[..best_prefix]
            .iter()
            .map(|run| RunSlot {
                start: extent_start + run.start,
                end: extent_start + run.end,
                rank: run.rank,
            })
            .collect();
        let lh_idx_count = slots.iter().map(|s| (s.end - s.start + 1) as u32).sum();

        Some(FacCand {
            info: best_info,
            lh_idx_count,
            lh_s_count: best_lh_s_count,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{RunSet, RunSlot, Splitter};
    use crate::stage::SpNode;

    fn sp(s_idx: u32, rank: u32, y: f64) -> SpNode {
        SpNode {
            s_idx,
            rank,
            s_count: 1,
            ctg: 0,
            y_sum: y,
        }
    }

    fn sp_ctg(s_idx: u32, rank: u32, ctg: u32) -> SpNode {
        SpNode {
            s_idx,
            rank,
            s_count: 1,
            ctg,
            y_sum: ctg as f64,
        }
    }

    #[test]
    fn numeric_regression_splits_between_groups() {
        // Two well-separated response groups along the rank axis.
        let extent = [sp(0, 0, 1.0), sp(1, 1, 2.0), sp(2, 2, 10.0), sp(3, 3, 11.0)];
        let mut splitter = Splitter::new(1, 0);
        let cand = splitter.split_num(&extent, 24.0, 4).unwrap();
        assert_eq!(cand.lh_idx_count, 2);
        assert_eq!(cand.lh_s_count, 2);
        // (3^2)/2 + (21^2)/2 - (24^2)/4 = 4.5 + 220.5 - 144 = 81.
        assert!((cand.info - 81.0).abs() < 1e-9);
    }

    #[test]
    fn numeric_skips_tied_ranks() {
        // The best boundary by response falls inside a tie and must move.
        let extent = [sp(0, 0, 1.0), sp(1, 1, 1.0), sp(2, 1, 9.0), sp(3, 2, 9.0)];
        let mut splitter = Splitter::new(1, 0);
        let cand = splitter.split_num(&extent, 20.0, 4).unwrap();
        // Admissible boundaries are after position 0 or after position 2.
        assert!(cand.lh_idx_count == 1 || cand.lh_idx_count == 3);
    }

    #[test]
    fn numeric_min_node_blocks_split() {
        let extent = [sp(0, 0, 1.0), sp(1, 1, 10.0)];
        let mut splitter = Splitter::new(2, 0);
        assert!(splitter.split_num(&extent, 11.0, 2).is_none());
    }

    #[test]
    fn numeric_uninformative_extent_yields_none() {
        let extent = [sp(0, 0, 5.0), sp(1, 1, 5.0)];
        let mut splitter = Splitter::new(1, 0);
        assert!(splitter.split_num(&extent, 10.0, 2).is_none());
    }

    #[test]
    fn numeric_gini_separates_classes() {
        let extent = [sp_ctg(0, 0, 0), sp_ctg(1, 1, 0), sp_ctg(2, 2, 1), sp_ctg(3, 3, 1)];
        let mut splitter = Splitter::new(1, 2);
        let cand = splitter.split_num(&extent, 2.0, 4).unwrap();
        assert_eq!(cand.lh_idx_count, 2);
        // Pure children: 2 + 2 - (4+4)/4 = 2.
        assert!((cand.info - 2.0).abs() < 1e-9);
    }

    #[test]
    fn factor_runs_choose_low_mean_prefix() {
        // Levels 0 and 2 share low responses; level 1 is high.
        let extent = [
            sp(0, 0, 1.0),
            sp(1, 0, 2.0),
            sp(2, 1, 10.0),
            sp(3, 1, 11.0),
            sp(4, 2, 1.5),
        ];
        let mut splitter = Splitter::new(1, 0);
        let cand = splitter.split_fac(&extent, 100, 25.5, 5).unwrap();
        // Left set is the two low-mean runs, slots carry absolute bounds.
        assert_eq!(cand.lh_idx_count, 3);
        let ranks: Vec<u32> = cand.slots.iter().map(|s| s.rank).collect();
        assert!(ranks.contains(&0) && ranks.contains(&2));
        assert!(cand.slots.iter().all(|s| s.start >= 100));
        let slot0 = cand.slots.iter().find(|s| s.rank == 0).unwrap();
        assert_eq!((slot0.start, slot0.end), (100, 101));
    }

    #[test]
    fn factor_single_run_yields_none() {
        let extent = [sp(0, 1, 1.0), sp(1, 1, 2.0)];
        let mut splitter = Splitter::new(1, 0);
        assert!(splitter.split_fac(&extent, 0, 3.0, 2).is_none());
    }

    #[test]
    fn factor_gini_two_class() {
        let extent = [
            sp_ctg(0, 0, 0),
            sp_ctg(1, 0, 0),
            sp_ctg(2, 1, 1),
            sp_ctg(3, 1, 1),
            sp_ctg(4, 2, 0),
        ];
        let mut splitter = Splitter::new(1, 2);
        let cand = splitter.split_fac(&extent, 0, 2.0, 5).unwrap();
        // Levels 0 and 2 are pure class zero and go left together.
        assert_eq!(cand.lh_idx_count, 3);
        assert_eq!(cand.lh_s_count, 3);
    }

    #[test]
    fn run_set_round_trip() {
        let mut runs = RunSet::default();
        let idx = runs.push(vec![RunSlot { start: 3, end: 5, rank: 2 }]);
        assert_eq!(idx, 0);
        assert_eq!(runs.lh_slots(idx), &[RunSlot { start: 3, end: 5, rank: 2 }]);
        runs.clear();
        let idx2 = runs.push(vec![]);
        assert_eq!(idx2, 0);
    }
}
