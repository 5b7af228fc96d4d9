use crate::deposit::deposit_topic;
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, Log, H256, U256, U64};

/// `DepositERC20` log as a node would deliver it.
pub fn deposit_log(token_id: U256, from: Address, token_address: Address, block_number: u64, log_index: u64) -> Log {
    let data = abi::encode(&[Token::Uint(token_id), Token::Address(from), Token::Address(token_address)]);
    let mut tx_hash = [0u8; 32];
    tx_hash[..8].copy_from_slice(&block_number.to_be_bytes());
    tx_hash[8..16].copy_from_slice(&log_index.to_be_bytes());

    Log {
        address: Address::repeat_byte(0xde),
        topics: vec![deposit_topic()],
        data: Bytes::from(data),
        block_number: Some(U64::from(block_number)),
        log_index: Some(U256::from(log_index)),
        transaction_hash: Some(H256::from(tx_hash)),
        removed: Some(false),
        ..Default::default()
    }
}

/// Deposit of token `token_id` with fixed addresses.
pub fn simple_deposit(token_id: u64, block_number: u64, log_index: u64) -> Log {
    deposit_log(
        U256::from(token_id),
        Address::repeat_byte(0x11),
        Address::repeat_byte(0x22),
        block_number,
        log_index,
    )
}
