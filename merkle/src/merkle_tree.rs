use crate::hash::{combine, leaf_hash, HashError, EMPTY};
use crate::merkle_proof::MerklePath;
use ark_bn254::Fr;
use state::transaction::TransactionRecord;

/// Append-only binary tree over transaction leaves.
///
/// Level 0 holds the leaves in insertion order, level `k + 1` holds the parents of level `k`.
/// A node without a right neighbour is promoted to the next level as is (see
/// [`combine`]), so the root only depends on the ordered leaves and the depth is
/// `ceil(log2(leaf count))`.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Fr>>,
}

/// Result of appending one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub old_root: Fr,
    pub new_root: Fr,
    pub path: MerklePath,
    pub leaf: Fr,
    pub leaf_index: u64,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    pub fn new() -> Self {
        MerkleTree { levels: vec![Vec::new()] }
    }

    pub fn from_leaves(leaves: &[Fr]) -> Result<Self, HashError> {
        let mut tree = MerkleTree::new();
        for leaf in leaves {
            tree.push_leaf(*leaf)?;
        }
        Ok(tree)
    }

    pub fn from_records(records: &[TransactionRecord]) -> Result<Self, HashError> {
        let mut tree = MerkleTree::new();
        for record in records {
            tree.push_leaf(leaf_hash(record)?)?;
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn depth(&self) -> usize {
        ceil_log2(self.len() as u64)
    }

    pub fn leaves(&self) -> &[Fr] {
        &self.levels[0]
    }

    pub fn root(&self) -> Fr {
        if self.is_empty() {
            return EMPTY;
        }
        self.levels[self.depth()][0]
    }

    /// Root and inclusion path the tree would have after appending `leaf`, without appending it.
    ///
    /// Left siblings on the new leaf's path are complete subtrees that the append cannot change,
    /// and every right sibling covers slots past the new leaf, so they are empty.
    pub fn preview_append(&self, leaf: Fr) -> Result<Insertion, HashError> {
        let leaf_index = self.len() as u64;
        let depth = ceil_log2(leaf_index + 1);
        let mut sibling_hashes = Vec::with_capacity(depth);
        let mut index = leaf_index as usize;
        for level in 0..depth {
            if index % 2 == 1 {
                let sibling = self
                    .levels
                    .get(level)
                    .and_then(|nodes| nodes.get(index - 1))
                    .copied()
                    .unwrap_or(EMPTY);
                sibling_hashes.push((sibling, true));
            } else {
                sibling_hashes.push((EMPTY, false));
            }
            index /= 2;
        }
        let path = MerklePath::new(sibling_hashes);
        let new_root = path.compute_root(leaf)?;

        Ok(Insertion {
            old_root: self.root(),
            new_root,
            path,
            leaf,
            leaf_index,
        })
    }

    pub fn append(&mut self, leaf: Fr) -> Result<Insertion, HashError> {
        let insertion = self.preview_append(leaf)?;
        self.push_leaf(leaf)?;
        Ok(insertion)
    }

    pub fn append_record(&mut self, record: &TransactionRecord) -> Result<Insertion, HashError> {
        self.append(leaf_hash(record)?)
    }

    /// Inclusion path of the leaf at `index` in the current tree.
    pub fn path(&self, index: usize) -> Option<MerklePath> {
        if index >= self.len() {
            return None;
        }
        let mut sibling_hashes = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in 0..self.depth() {
            let sibling = self.levels[level].get(position ^ 1).copied().unwrap_or(EMPTY);
            sibling_hashes.push((sibling, position % 2 == 1));
            position /= 2;
        }
        Some(MerklePath::new(sibling_hashes))
    }

    /// Root the tree had when it held its first `size` leaves.
    pub fn root_at(&self, size: usize) -> Result<Option<Fr>, HashError> {
        if size > self.len() {
            return Ok(None);
        }
        Ok(Some(MerkleTree::from_leaves(&self.levels[0][..size])?.root()))
    }

    /// Path of leaf `index` as it was generated when the tree held `size` leaves.
    pub fn path_at(&self, index: usize, size: usize) -> Result<Option<MerklePath>, HashError> {
        if size > self.len() || index >= size {
            return Ok(None);
        }
        Ok(MerkleTree::from_leaves(&self.levels[0][..size])?.path(index))
    }

    fn push_leaf(&mut self, leaf: Fr) -> Result<(), HashError> {
        self.levels[0].push(leaf);
        let mut index = self.levels[0].len() - 1;
        let mut level = 0;
        while self.levels[level].len() > 1 {
            let parent_index = index / 2;
            let left = self.levels[level][parent_index * 2];
            let right = self.levels[level].get(parent_index * 2 + 1).copied().unwrap_or(EMPTY);
            let parent = combine(left, right)?;

            if self.levels.len() == level + 1 {
                self.levels.push(Vec::new());
            }
            let parents = &mut self.levels[level + 1];
            if parent_index < parents.len() {
                parents[parent_index] = parent;
            } else {
                parents.push(parent);
            }

            index = parent_index;
            level += 1;
        }
        Ok(())
    }
}

pub fn ceil_log2(n: u64) -> usize {
    if n <= 1 {
        0
    } else {
        (64 - (n - 1).leading_zeros()) as usize
    }
}
