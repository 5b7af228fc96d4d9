pub mod deposit;
pub mod submitter;
pub mod watcher;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

/// Errors raised while turning configuration into chain clients.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid address {0}")]
    InvalidAddress(String),
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    #[error("Invalid endpoint {0}")]
    InvalidUrl(String),
}

pub fn parse_address(value: &str) -> Result<ethers::types::Address, SetupError> {
    value.trim().parse().map_err(|_| SetupError::InvalidAddress(value.to_string()))
}
