use crate::hash::{combine, HashError, EMPTY};
use ark_bn254::Fr;

/// Inclusion path of one leaf, ordered from the leaf level up to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    // (sibling, is_right_child): when set, the node on the path is the right child and the
    // sibling sits to its left.
    pub sibling_hashes: Vec<(Fr, bool)>,
}

impl MerklePath {
    pub fn new(sibling_hashes: Vec<(Fr, bool)>) -> Self {
        MerklePath { sibling_hashes }
    }

    /// Tree depth the path was generated against.
    pub fn depth(&self) -> usize {
        self.sibling_hashes.len()
    }

    /// Position of the leaf the path belongs to, read back from the direction bits.
    pub fn leaf_index(&self) -> u64 {
        self.sibling_hashes
            .iter()
            .enumerate()
            .fold(0u64, |index, (level, (_, is_right))| index | ((*is_right as u64) << level))
    }

    pub fn compute_root(&self, leaf: Fr) -> Result<Fr, HashError> {
        let mut current = leaf;
        for (sibling, is_right) in &self.sibling_hashes {
            current = if *is_right {
                combine(*sibling, current)?
            } else {
                combine(current, *sibling)?
            };
        }
        Ok(current)
    }

    pub fn verify(&self, leaf: Fr, root: &Fr) -> Result<bool, HashError> {
        Ok(self.compute_root(leaf)? == *root)
    }

    /// For the most recently appended leaf, the root its slot had before the append.
    pub fn root_before_append(&self) -> Result<Fr, HashError> {
        self.compute_root(EMPTY)
    }
}
