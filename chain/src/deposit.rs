use ethers::abi::{self, ParamType, Token};
use ethers::types::{Log, H256, U256};
use ethers::utils::keccak256;
use state::transaction::TransactionRecord;

/// Event emitted by the source bridge contract for every deposit.
pub const DEPOSIT_EVENT_SIGNATURE: &str = "DepositERC20(uint256,address,address)";

pub fn deposit_topic() -> H256 {
    H256::from(keccak256(DEPOSIT_EVENT_SIGNATURE))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log topic {0:?} is not a deposit")]
    UnexpectedTopic(Option<H256>),
    #[error("log was removed by a reorg")]
    Removed,
    #[error("log has no {0}")]
    MissingMetadata(&'static str),
    #[error("invalid deposit payload: {0}")]
    InvalidData(String),
}

/// Short description of where a log came from, for reports about dropped logs.
pub fn describe_log(log: &Log) -> String {
    format!(
        "block {:?} log {:?} tx {:?}",
        log.block_number.map(|b| b.as_u64()),
        log.log_index.map(|i| i.low_u64()),
        log.transaction_hash
    )
}

/// Decodes `DepositERC20(uint256 tokenID, address from, address tokenAddress)`. All three fields
/// are carried in the data section; block number and log index come from the log metadata.
pub fn decode_deposit(log: &Log) -> Result<TransactionRecord, DecodeError> {
    let topic = log.topics.first().copied();
    if topic != Some(deposit_topic()) {
        return Err(DecodeError::UnexpectedTopic(topic));
    }
    if log.removed == Some(true) {
        return Err(DecodeError::Removed);
    }
    let block_number = log.block_number.ok_or(DecodeError::MissingMetadata("block number"))?;
    let log_index = log.log_index.ok_or(DecodeError::MissingMetadata("log index"))?;

    let tokens = abi::decode(&[ParamType::Uint(256), ParamType::Address, ParamType::Address], &log.data)
        .map_err(|e| DecodeError::InvalidData(e.to_string()))?;
    let (token_id, from, token_address) = match tokens.as_slice() {
        [Token::Uint(token_id), Token::Address(from), Token::Address(token_address)] => (*token_id, *from, *token_address),
        _ => return Err(DecodeError::InvalidData(format!("unexpected tokens {:?}", tokens))),
    };

    let mut token_id_bytes = [0u8; 32];
    token_id.to_big_endian(&mut token_id_bytes);
    if log_index > U256::from(u64::MAX) {
        return Err(DecodeError::InvalidData("log index overflows u64".to_string()));
    }
    let log_index = log_index.as_u64();

    let record = TransactionRecord::new(token_id_bytes, from.0, token_address.0, block_number.as_u64(), log_index);
    Ok(match log.transaction_hash {
        Some(hash) => record.with_tx_hash(hash.0),
        None => record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::deposit_log;
    use ethers::types::{Address, Bytes};

    #[test]
    fn decodes_well_formed_deposit() {
        let from = Address::repeat_byte(0x11);
        let token = Address::repeat_byte(0x22);
        let log = deposit_log(U256::from(42u64), from, token, 1_234, 3);

        let record = decode_deposit(&log).unwrap();
        assert_eq!(record.token_id[31], 42);
        assert_eq!(record.from, from.0);
        assert_eq!(record.to, token.0);
        assert_eq!(record.block_number, 1_234);
        assert_eq!(record.log_index, 3);
    }

    #[test]
    fn keeps_full_width_token_id() {
        let log = deposit_log(U256::MAX, Address::zero(), Address::zero(), 1, 0);
        assert_eq!(decode_deposit(&log).unwrap().token_id, [0xff; 32]);
    }

    #[test]
    fn rejects_foreign_topic() {
        let mut log = deposit_log(U256::one(), Address::zero(), Address::zero(), 1, 0);
        log.topics = vec![H256::repeat_byte(1)];
        assert!(matches!(decode_deposit(&log), Err(DecodeError::UnexpectedTopic(_))));
        log.topics.clear();
        assert_eq!(decode_deposit(&log), Err(DecodeError::UnexpectedTopic(None)));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut log = deposit_log(U256::one(), Address::zero(), Address::zero(), 1, 0);
        log.data = Bytes::from(vec![0u8; 40]);
        assert!(matches!(decode_deposit(&log), Err(DecodeError::InvalidData(_))));
    }

    #[test]
    fn rejects_removed_and_pending_logs() {
        let mut removed = deposit_log(U256::one(), Address::zero(), Address::zero(), 1, 0);
        removed.removed = Some(true);
        assert_eq!(decode_deposit(&removed), Err(DecodeError::Removed));

        let mut pending = deposit_log(U256::one(), Address::zero(), Address::zero(), 1, 0);
        pending.block_number = None;
        assert_eq!(decode_deposit(&pending), Err(DecodeError::MissingMetadata("block number")));
    }
}
