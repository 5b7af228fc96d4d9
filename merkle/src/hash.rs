use ark_bn254::Fr;
use ark_ff::{BigInteger, Field, PrimeField};
use ark_std::Zero;
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher};
use state::transaction::TransactionRecord;

/// Value of a slot that holds no leaf yet.
pub const EMPTY: Fr = Fr::ZERO;

/// Number of field elements a transaction record is encoded into.
pub const LEAF_INPUTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("Poseidon hashing failed: {0}")]
    Poseidon(#[from] PoseidonError),
}

/// Hash of two child nodes.
pub fn hash_pair(left: Fr, right: Fr) -> Result<Fr, HashError> {
    let mut poseidon = Poseidon::<Fr>::new_circom(2)?;
    Ok(poseidon.hash(&[left, right])?)
}

/// Parent of two nodes. A node without a right neighbour is promoted unchanged, so a subtree
/// hashes the same no matter how many empty slots follow it.
pub fn combine(left: Fr, right: Fr) -> Result<Fr, HashError> {
    if right.is_zero() {
        Ok(left)
    } else {
        hash_pair(left, right)
    }
}

/// Field elements a record is committed to, in hashing order:
/// token id high half, token id low half, from, to, block number.
pub fn leaf_inputs(record: &TransactionRecord) -> [Fr; LEAF_INPUTS] {
    let (token_id_hi, token_id_lo) = record.token_id_limbs();
    [
        Fr::from_be_bytes_mod_order(&token_id_hi),
        Fr::from_be_bytes_mod_order(&token_id_lo),
        Fr::from_be_bytes_mod_order(&record.from),
        Fr::from_be_bytes_mod_order(&record.to),
        Fr::from(record.block_number),
    ]
}

pub fn leaf_hash(record: &TransactionRecord) -> Result<Fr, HashError> {
    let mut poseidon = Poseidon::<Fr>::new_circom(LEAF_INPUTS)?;
    Ok(poseidon.hash(&leaf_inputs(record))?)
}

/// Big-endian 32 byte word of any prime field element, the layout EVM contracts use for `uint256`.
pub fn field_to_be_bytes<F: PrimeField>(field: &F) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let be = field.into_bigint().to_bytes_be();
    bytes[32 - be.len()..].copy_from_slice(&be);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use state::transaction::token_id_from_u64;

    fn record(token_id: u64) -> TransactionRecord {
        TransactionRecord::new(token_id_from_u64(token_id), [0x11; 20], [0x22; 20], 100, 0)
    }

    #[test]
    fn combine_promotes_lone_left_node() {
        let left = Fr::from(42u64);
        assert_eq!(combine(left, EMPTY).unwrap(), left);
        assert_ne!(combine(left, Fr::from(1u64)).unwrap(), left);
    }

    #[test]
    fn pair_hash_is_order_sensitive() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_ne!(hash_pair(a, b).unwrap(), hash_pair(b, a).unwrap());
    }

    #[test]
    fn leaf_commits_to_every_hashed_field() {
        let base = record(1);
        let base_hash = leaf_hash(&base).unwrap();

        let mut other = base.clone();
        other.to = [0x23; 20];
        assert_ne!(leaf_hash(&other).unwrap(), base_hash);

        let mut other = base.clone();
        other.from = [0x12; 20];
        assert_ne!(leaf_hash(&other).unwrap(), base_hash);

        let mut other = base.clone();
        other.block_number = 101;
        assert_ne!(leaf_hash(&other).unwrap(), base_hash);

        assert_ne!(leaf_hash(&record(2)).unwrap(), base_hash);
    }

    #[test]
    fn leaf_ignores_log_position() {
        let a = record(1);
        let b = TransactionRecord { log_index: 9, tx_hash: [1u8; 32], ..a.clone() };
        assert_eq!(leaf_hash(&a).unwrap(), leaf_hash(&b).unwrap());
    }

    #[test]
    fn high_token_id_bits_are_not_truncated() {
        let mut high = record(0);
        high.token_id[0] = 0xff;
        assert_ne!(leaf_hash(&high).unwrap(), leaf_hash(&record(0)).unwrap());
    }

    #[test]
    fn be_bytes_are_left_padded() {
        let value = Fr::from(0x0102_0304u64);
        let bytes = field_to_be_bytes(&value);
        assert_eq!(&bytes[28..], &[1, 2, 3, 4]);
        assert!(bytes[..28].iter().all(|byte| *byte == 0));
        assert_eq!(Fr::from_be_bytes_mod_order(&bytes), value);
    }
}
