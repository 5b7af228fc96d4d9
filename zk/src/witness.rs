use ark_bn254::Fr;
use merkle::hash::{field_to_be_bytes, leaf_inputs, LEAF_INPUTS};
use merkle::merkle_proof::MerklePath;
use merkle::merkle_tree::Insertion;
use state::transaction::TransactionRecord;

/// Number of public inputs the circuit exposes.
pub const PUBLIC_INPUTS: usize = 9;

/// Everything needed to prove that `new_root` is `previous_root` with one more record appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransitionWitness {
    pub previous_root: Fr,
    pub new_root: Fr,
    pub previous_block_number: u64,
    pub block_number: u64,
    pub token_id: [u8; 32],
    pub from: [u8; 20],
    pub to: [u8; 20],
    /// Slot the record is appended to, i.e. the leaf count under `previous_root`.
    pub leaf_index: u64,
    pub merkle_path: MerklePath,
}

/// One level of the fixed-depth path handed to the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLevel {
    pub sibling: Fr,
    pub is_right: bool,
}

impl PathLevel {
    /// Levels above the real path depth: zero sibling, left direction.
    pub const PADDING: PathLevel = PathLevel {
        sibling: merkle::hash::EMPTY,
        is_right: false,
    };
}

impl StateTransitionWitness {
    pub fn new(record: &TransactionRecord, insertion: &Insertion, previous_block_number: u64) -> Self {
        StateTransitionWitness {
            previous_root: insertion.old_root,
            new_root: insertion.new_root,
            previous_block_number,
            block_number: record.block_number,
            token_id: record.token_id,
            from: record.from,
            to: record.to,
            leaf_index: insertion.leaf_index,
            merkle_path: insertion.path.clone(),
        }
    }

    pub fn record(&self) -> TransactionRecord {
        TransactionRecord::new(self.token_id, self.from, self.to, self.block_number, 0)
    }

    pub fn leaf_inputs(&self) -> [Fr; LEAF_INPUTS] {
        leaf_inputs(&self.record())
    }

    /// Public inputs in allocation order: previous root, new root, block number, token id high,
    /// token id low, from, to, previous block number, leaf index.
    pub fn public_inputs(&self) -> Vec<Fr> {
        let [token_id_hi, token_id_lo, from, to, _] = self.leaf_inputs();
        vec![
            self.previous_root,
            self.new_root,
            Fr::from(self.block_number),
            token_id_hi,
            token_id_lo,
            from,
            to,
            Fr::from(self.previous_block_number),
            Fr::from(self.leaf_index),
        ]
    }

    pub fn public_input_bytes(&self) -> Vec<[u8; 32]> {
        self.public_inputs().iter().map(field_to_be_bytes).collect()
    }

    /// The path padded to `max_depth` levels. `None` if it does not fit.
    pub fn padded_path(&self, max_depth: usize) -> Option<Vec<PathLevel>> {
        if self.merkle_path.depth() > max_depth {
            return None;
        }
        let mut levels: Vec<PathLevel> = self
            .merkle_path
            .sibling_hashes
            .iter()
            .map(|(sibling, is_right)| PathLevel { sibling: *sibling, is_right: *is_right })
            .collect();
        levels.resize(max_depth, PathLevel::PADDING);
        Some(levels)
    }
}
