use crate::SetupError;
use async_trait::async_trait;
use bridge_zk::prove::ProofPackage;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionReceipt, TransactionRequest, H256, U256, U64};
use ethers::utils::keccak256;
use log::{debug, info, warn};
use state::config::OracleConfig;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

pub const VERIFY_PROOF_SIGNATURE: &str = "verifyProof(bytes,uint256[])";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub tx_hash: [u8; 32],
    pub block_number: u64,
    /// Transactions broadcast for this proof, resubmissions included.
    pub broadcasts: usize,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("submission to {chain} failed: {reason}")]
    Network { chain: String, reason: String },
    #[error("verifier on {chain} rejected the proof: {reason}")]
    Reverted { chain: String, reason: String, tx_hash: Option<[u8; 32]> },
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Network { .. })
    }
}

/// Delivers proofs to the destination verifier.
#[async_trait]
pub trait ProofSubmitter: Send + Sync + 'static {
    fn chain_name(&self) -> &str;

    /// Sends the proof and waits for it to be mined. A `Network` error leaves the submission
    /// resumable: calling `submit` again with the same package never broadcasts a duplicate.
    async fn submit(&self, package: &ProofPackage) -> Result<SubmissionReceipt, SubmitError>;
}

/// ABI encoded `verifyProof(bytes proof, uint256[] input)` call.
pub fn encode_verify_call(package: &ProofPackage) -> Bytes {
    let inputs = package
        .public_inputs
        .iter()
        .map(|word| Token::Uint(U256::from_big_endian(word)))
        .collect();
    let mut calldata = keccak256(VERIFY_PROOF_SIGNATURE)[..4].to_vec();
    calldata.extend_from_slice(&abi::encode(&[Token::Bytes(package.proof.clone()), Token::Array(inputs)]));
    Bytes::from(calldata)
}

pub fn bump_gas_price(gas_price: U256, percent: u64) -> U256 {
    let bumped = gas_price * U256::from(100 + percent) / U256::from(100u64);
    bumped.max(gas_price + U256::one())
}

// JSON-RPC nodes report reverts as "execution reverted" with varying prefixes.
fn is_revert(message: &str) -> bool {
    message.to_lowercase().contains("revert")
}

// The broadcast itself may fail because an earlier attempt with the same nonce already landed.
fn is_nonce_consumed(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("nonce too low") || message.contains("already known")
}

#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_bump_percent: u64,
    pub request_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub max_resubmissions: u32,
}

impl SubmitterSettings {
    pub fn from_config(config: &OracleConfig) -> Self {
        SubmitterSettings {
            chain_id: config.destination_chain_id,
            gas_limit: config.gas_limit,
            gas_bump_percent: config.gas_bump_percent,
            request_timeout: config.destination_request_timeout(),
            confirmation_timeout: config.confirmation_timeout(),
            poll_interval: config.receipt_poll_interval(),
            max_resubmissions: config.max_resubmissions,
        }
    }
}

// A proof whose transaction has been signed but not seen mined yet.
struct InFlight {
    calldata: Bytes,
    nonce: U256,
    gas_price: U256,
    tx_hashes: Vec<H256>,
}

/// Submits proofs as legacy transactions with an explicitly tracked nonce. A transaction that is
/// not mined within the confirmation timeout is replaced by one with the same nonce and a higher
/// gas price, so at most one of the attempts can ever be mined.
///
/// Transactions are signed locally and their hash is recorded before the broadcast, so an attempt
/// whose reply was lost is still found by its receipt.
pub struct EvmProofSubmitter<M = Provider<Http>> {
    chain_name: String,
    client: M,
    wallet: LocalWallet,
    verifier: Address,
    settings: SubmitterSettings,
    in_flight: Mutex<Option<InFlight>>,
}

impl EvmProofSubmitter<Provider<Http>> {
    pub fn new(
        chain_name: &str,
        rpc_url: &str,
        verifier: &str,
        signing_key: &str,
        settings: SubmitterSettings,
    ) -> Result<Self, SetupError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|_| SetupError::InvalidUrl(rpc_url.to_string()))?;
        let wallet = signing_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| SetupError::InvalidKey(e.to_string()))?;
        let verifier = crate::parse_address(verifier)?;
        Ok(Self::with_client(chain_name, provider, wallet, verifier, settings))
    }
}

impl<M: Middleware> EvmProofSubmitter<M> {
    pub fn with_client(
        chain_name: &str,
        client: M,
        wallet: LocalWallet,
        verifier: Address,
        settings: SubmitterSettings,
    ) -> Self {
        let wallet = wallet.with_chain_id(settings.chain_id);
        info!("Submitting proofs to {} from {:?}", chain_name, wallet.address());
        EvmProofSubmitter {
            chain_name: chain_name.to_string(),
            client,
            wallet,
            verifier,
            settings,
            in_flight: Mutex::new(None),
        }
    }

    fn network(&self, reason: String) -> SubmitError {
        SubmitError::Network { chain: self.chain_name.clone(), reason }
    }

    fn reverted(&self, reason: String, tx_hash: Option<H256>) -> SubmitError {
        SubmitError::Reverted { chain: self.chain_name.clone(), reason, tx_hash: tx_hash.map(|hash| hash.0) }
    }

    async fn request<T, E: std::fmt::Display>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, SubmitError> {
        match timeout(self.settings.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let message = e.to_string();
                if is_revert(&message) {
                    Err(self.reverted(message, None))
                } else {
                    Err(self.network(format!("{}: {}", operation, message)))
                }
            }
            Err(_) => Err(self.network(format!("{} timed out", operation))),
        }
    }

    fn transaction(&self, calldata: &Bytes) -> TransactionRequest {
        TransactionRequest::new()
            .from(self.wallet.address())
            .to(self.verifier)
            .data(calldata.clone())
            .gas(self.settings.gas_limit)
            .chain_id(self.settings.chain_id)
    }

    // Dry run against the latest state so a rejected proof costs no gas.
    async fn preflight(&self, calldata: &Bytes) -> Result<(), SubmitError> {
        let call: TypedTransaction = self.transaction(calldata).into();
        let output = self.request("eth_call", self.client.call(&call, None)).await?;
        if let Ok(tokens) = abi::decode(&[ParamType::Bool], &output) {
            if tokens == vec![Token::Bool(false)] {
                return Err(self.reverted("verifyProof returned false".to_string(), None));
            }
        }
        Ok(())
    }

    async fn start(&self, calldata: Bytes) -> Result<InFlight, SubmitError> {
        self.preflight(&calldata).await?;
        let nonce = self
            .request(
                "nonce",
                self.client.get_transaction_count(self.wallet.address(), Some(BlockNumber::Pending.into())),
            )
            .await?;
        let gas_price = self.request("gas price", self.client.get_gas_price()).await?;
        Ok(InFlight { calldata, nonce, gas_price, tx_hashes: Vec::new() })
    }

    async fn find_receipt(&self, hashes: &[H256]) -> Result<Option<TransactionReceipt>, SubmitError> {
        for hash in hashes {
            let receipt = self.request("receipt", self.client.get_transaction_receipt(*hash)).await?;
            if let Some(receipt) = receipt.filter(|receipt| receipt.block_number.is_some()) {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    async fn await_receipt(&self, hashes: &[H256]) -> Result<Option<TransactionReceipt>, SubmitError> {
        let deadline = Instant::now() + self.settings.confirmation_timeout;
        loop {
            if let Some(receipt) = self.find_receipt(hashes).await? {
                return Ok(Some(receipt));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    fn finish(&self, receipt: TransactionReceipt, broadcasts: usize) -> Result<SubmissionReceipt, SubmitError> {
        if receipt.status == Some(U64::zero()) {
            return Err(self.reverted("transaction reverted".to_string(), Some(receipt.transaction_hash)));
        }
        let block_number = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
        info!("Proof confirmed on {} in block {} tx {:?}", self.chain_name, block_number, receipt.transaction_hash);
        Ok(SubmissionReceipt { tx_hash: receipt.transaction_hash.0, block_number, broadcasts })
    }
}

#[async_trait]
impl<M: Middleware + 'static> ProofSubmitter for EvmProofSubmitter<M> {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn submit(&self, package: &ProofPackage) -> Result<SubmissionReceipt, SubmitError> {
        let calldata = encode_verify_call(package);
        let mut guard = self.in_flight.lock().await;

        if guard.as_ref().map_or(false, |in_flight| in_flight.calldata != calldata) {
            warn!("Discarding unconfirmed submission of a different proof on {}", self.chain_name);
            *guard = None;
        }
        if guard.is_none() {
            *guard = Some(self.start(calldata).await?);
        }
        let Some(in_flight) = guard.as_mut() else {
            return Err(self.network("no submission in flight".to_string()));
        };

        for attempt in 0..=self.settings.max_resubmissions {
            // An earlier broadcast may have been mined while we were away.
            if let Some(receipt) = self.find_receipt(&in_flight.tx_hashes).await? {
                let broadcasts = in_flight.tx_hashes.len();
                *guard = None;
                return self.finish(receipt, broadcasts);
            }
            if attempt > 0 || !in_flight.tx_hashes.is_empty() {
                in_flight.gas_price = bump_gas_price(in_flight.gas_price, self.settings.gas_bump_percent);
            }

            let tx: TypedTransaction = self
                .transaction(&in_flight.calldata)
                .nonce(in_flight.nonce)
                .gas_price(in_flight.gas_price)
                .into();
            let signature = self
                .wallet
                .sign_transaction(&tx)
                .await
                .map_err(|e| self.network(format!("signing failed: {}", e)))?;
            let hash = tx.hash(&signature);
            in_flight.tx_hashes.push(hash);

            debug!("Broadcasting proof to {} nonce {} gas price {} tx {:?}", self.chain_name, in_flight.nonce, in_flight.gas_price, hash);
            match self.request("send", self.client.send_raw_transaction(tx.rlp_signed(&signature))).await {
                Ok(_) => info!("Proof submitted to {} in tx {:?}", self.chain_name, hash),
                Err(SubmitError::Network { reason, .. }) if is_nonce_consumed(&reason) => {
                    debug!("Nonce {} already used on {}, waiting for earlier broadcast", in_flight.nonce, self.chain_name);
                }
                Err(e) => return Err(e),
            }

            if let Some(receipt) = self.await_receipt(&in_flight.tx_hashes).await? {
                let broadcasts = in_flight.tx_hashes.len();
                *guard = None;
                return self.finish(receipt, broadcasts);
            }
            warn!("Proof not confirmed on {} within {:?}", self.chain_name, self.settings.confirmation_timeout);
        }

        Err(self.network(format!(
            "not confirmed after {} broadcasts",
            in_flight.tx_hashes.len()
        )))
    }
}
