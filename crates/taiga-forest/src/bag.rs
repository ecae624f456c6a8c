//! In-bag membership bitmaps.
//!
//! Two linearizations of the same information, chosen for the access
//! pattern of their consumer. The per-tree [`RowBitset`] is row-indexed:
//! bagging writes it row by row. The forest-wide [`BagMap`] is
//! tree-indexed: for a bit at `(tree, row)` the linear position is
//! `tree + row * n_tree`, so prediction, which iterates trees inside a
//! fixed row, tests consecutive bits.

const WORD_BITS: usize = 32;

/// Row-indexed in-bag bitset for a single tree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RowBitset {
    words: Vec<u32>,
    n_row: usize,
}

impl RowBitset {
    /// Create an all-clear bitset over `n_row` rows.
    #[must_use]
    pub fn new(n_row: usize) -> Self {
        Self {
            words: vec![0; n_row.div_ceil(WORD_BITS)],
            n_row,
        }
    }

    /// Mark a row as in-bag.
    pub fn set(&mut self, row: usize) {
        self.words[row / WORD_BITS] |= 1 << (row % WORD_BITS);
    }

    /// Test whether a row is in-bag.
    #[must_use]
    pub fn test(&self, row: usize) -> bool {
        self.words[row / WORD_BITS] & (1 << (row % WORD_BITS)) != 0
    }

    /// Return the number of rows covered.
    #[must_use]
    pub fn n_row(&self) -> usize {
        self.n_row
    }
}

/// Forest-wide in-bag bit matrix, tree as the faster-moving axis.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BagMap {
    words: Vec<u32>,
    n_tree: usize,
    n_row: usize,
}

impl BagMap {
    /// Create an all-clear bag matrix over `n_tree * n_row` bits.
    #[must_use]
    pub fn new(n_tree: usize, n_row: usize) -> Self {
        Self {
            words: vec![0; (n_tree * n_row).div_ceil(WORD_BITS)],
            n_tree,
            n_row,
        }
    }

    #[inline]
    fn coord(&self, tree: usize, row: usize) -> (usize, u32) {
        let linear = tree + row * self.n_tree;
        (linear / WORD_BITS, (linear % WORD_BITS) as u32)
    }

    /// Mark `(tree, row)` as in-bag.
    pub fn set(&mut self, tree: usize, row: usize) {
        let (word, bit) = self.coord(tree, row);
        self.words[word] |= 1 << bit;
    }

    /// Test whether `(tree, row)` is in-bag.
    #[inline]
    #[must_use]
    pub fn test(&self, tree: usize, row: usize) -> bool {
        let (word, bit) = self.coord(tree, row);
        self.words[word] & (1 << bit) != 0
    }

    /// Translate a tree's row-indexed bitset into this matrix.
    ///
    /// The final partial word of `rows` is handled by bounding the row
    /// index, so bitsets whose width is not a word multiple ingest
    /// cleanly.
    pub fn ingest(&mut self, tree: usize, rows: &RowBitset) {
        for row in 0..rows.n_row().min(self.n_row) {
            if rows.test(row) {
                self.set(tree, row);
            }
        }
    }

    /// Return the tree count covered.
    #[must_use]
    pub fn n_tree(&self) -> usize {
        self.n_tree
    }

    /// Return the row count covered.
    #[must_use]
    pub fn n_row(&self) -> usize {
        self.n_row
    }
}

#[cfg(test)]
mod tests {
    use super::{BagMap, RowBitset};

    #[test]
    fn row_bitset_set_and_test() {
        let mut bits = RowBitset::new(70);
        bits.set(0);
        bits.set(31);
        bits.set(32);
        bits.set(69);
        assert!(bits.test(0));
        assert!(bits.test(31));
        assert!(bits.test(32));
        assert!(bits.test(69));
        assert!(!bits.test(1));
        assert!(!bits.test(68));
    }

    #[test]
    fn bag_map_coordinates_tree_fastest() {
        let mut bag = BagMap::new(3, 4);
        bag.set(2, 1);
        // Linear index 2 + 1*3 = 5: word 0, bit 5.
        assert!(bag.test(2, 1));
        assert!(!bag.test(1, 2));
        assert!(!bag.test(2, 0));
    }

    #[test]
    fn ingest_matches_row_axis_bitset() {
        // Row counts straddling a word boundary exercise the partial word.
        for n_row in [5usize, 32, 33, 64, 70] {
            let n_tree = 3;
            let mut bag = BagMap::new(n_tree, n_row);
            let mut per_tree: Vec<RowBitset> = Vec::new();
            for tree in 0..n_tree {
                let mut rows = RowBitset::new(n_row);
                for row in 0..n_row {
                    if (row + tree) % 3 == 0 {
                        rows.set(row);
                    }
                }
                bag.ingest(tree, &rows);
                per_tree.push(rows);
            }
            for tree in 0..n_tree {
                for row in 0..n_row {
                    assert_eq!(
                        bag.test(tree, row),
                        per_tree[tree].test(row),
                        "tree {tree} row {row} n_row {n_row}"
                    );
                }
            }
        }
    }

    #[test]
    fn dense_bag_round_trip() {
        let mut bag = BagMap::new(7, 11);
        for tree in 0..7 {
            for row in 0..11 {
                if (tree * 11 + row) % 2 == 0 {
                    bag.set(tree, row);
                }
            }
        }
        for tree in 0..7 {
            for row in 0..11 {
                assert_eq!(bag.test(tree, row), (tree * 11 + row) % 2 == 0);
            }
        }
    }
}
