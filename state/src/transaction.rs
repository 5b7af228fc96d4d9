use crate::state_record::StateRecord;
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of a source-chain log. Ordered by block first, then by position inside the block,
/// which is the order the chain emits them in.
#[derive(Debug, BorshDeserialize, BorshSerialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    pub block_number: u64,
    pub log_index: u64,
}

impl EventId {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        EventId { block_number, log_index }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// A deposit observed on the source chain.
/// - `token_id`: the 256-bit token id, big-endian.
/// - `from`: depositor address.
/// - `to`: token contract address.
/// - `block_number` / `log_index`: position of the log on the source chain.
/// - `tx_hash`: hash of the transaction that emitted the log, kept for diagnostics only.
#[derive(Debug, BorshDeserialize, BorshSerialize, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub token_id: [u8; 32],
    pub from: [u8; 20],
    pub to: [u8; 20],
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: [u8; 32],
}

impl TransactionRecord {
    pub fn new(token_id: [u8; 32], from: [u8; 20], to: [u8; 20], block_number: u64, log_index: u64) -> Self {
        TransactionRecord {
            token_id,
            from,
            to,
            block_number,
            log_index,
            tx_hash: [0u8; 32],
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: [u8; 32]) -> Self {
        self.tx_hash = tx_hash;
        self
    }

    pub fn event_id(&self) -> EventId {
        EventId::new(self.block_number, self.log_index)
    }

    /// Token id as `(high, low)` 128-bit halves, each big-endian.
    pub fn token_id_limbs(&self) -> ([u8; 16], [u8; 16]) {
        let mut hi = [0u8; 16];
        let mut lo = [0u8; 16];
        hi.copy_from_slice(&self.token_id[..16]);
        lo.copy_from_slice(&self.token_id[16..]);
        (hi, lo)
    }
}

impl StateRecord for TransactionRecord {
    fn get_key(&self) -> Option<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(self.block_number.to_be_bytes());
        hasher.update(self.log_index.to_be_bytes());
        Some(hasher.finalize().into())
    }
}

/// Left-pads a small integer into a 256-bit big-endian token id.
pub fn token_id_from_u64(value: u64) -> [u8; 32] {
    let mut token_id = [0u8; 32];
    token_id[24..].copy_from_slice(&value.to_be_bytes());
    token_id
}
