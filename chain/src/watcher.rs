use crate::deposit::{decode_deposit, deposit_topic, describe_log};
use crate::SetupError;
use async_trait::async_trait;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log};
use futures_util::StreamExt;
use log::{debug, info, warn};
use state::transaction::TransactionRecord;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("connection to {chain} failed: {reason}")]
    Connection { chain: String, reason: String },
    #[error("{operation} on {chain} timed out")]
    Timeout { chain: String, operation: &'static str },
    #[error("subscription on {chain} closed")]
    SubscriptionClosed { chain: String },
    #[error("watcher task failed: {0}")]
    Task(String),
}

/// What the watcher forwards to its consumer, in source-chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Deposit(TransactionRecord),
    /// The subscription ended. The consumer decides whether and when to reconnect.
    Disconnected(WatchError),
}

/// Source of raw contract logs.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    fn chain_name(&self) -> &str;

    /// Pushes every log at or after `from_block` into `sink` in chain order, first the history
    /// and then live logs. Returns `Ok` once the receiving side is dropped, an error when the
    /// subscription fails.
    async fn stream_logs(&self, from_block: u64, sink: mpsc::Sender<Log>) -> Result<(), WatchError>;
}

/// Websocket log source filtered on one contract and the deposit topic.
pub struct EthersLogSource {
    chain_name: String,
    url: String,
    contract: Address,
    request_timeout: Duration,
}

impl EthersLogSource {
    pub fn new(chain_name: &str, url: &str, contract: &str, request_timeout: Duration) -> Result<Self, SetupError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SetupError::InvalidUrl(url.to_string()));
        }
        Ok(EthersLogSource {
            chain_name: chain_name.to_string(),
            url: url.to_string(),
            contract: crate::parse_address(contract)?,
            request_timeout,
        })
    }

    fn filter(&self) -> Filter {
        Filter::new().address(self.contract).topic0(deposit_topic())
    }

    async fn request<T, E: std::fmt::Display>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, WatchError> {
        match timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(WatchError::Connection { chain: self.chain_name.clone(), reason: format!("{}: {}", operation, e) }),
            Err(_) => Err(WatchError::Timeout { chain: self.chain_name.clone(), operation }),
        }
    }
}

#[async_trait]
impl LogSource for EthersLogSource {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn stream_logs(&self, from_block: u64, sink: mpsc::Sender<Log>) -> Result<(), WatchError> {
        let provider = self.request("connect", Provider::<Ws>::connect(self.url.as_str())).await?;
        let filter = self.filter();

        // Subscribe before reading history so nothing falls between the two.
        let mut stream = self.request("subscribe", provider.subscribe_logs(&filter)).await?;
        let head = self.request("block number", provider.get_block_number()).await?.as_u64();

        if head >= from_block {
            let history = filter.clone().from_block(from_block).to_block(head);
            let logs = self.request("get logs", provider.get_logs(&history)).await?;
            info!("Backfilling {} logs from {} blocks {}..={}", logs.len(), self.chain_name, from_block, head);
            for log in logs {
                if sink.send(log).await.is_err() {
                    return Ok(());
                }
            }
        }

        while let Some(log) = stream.next().await {
            // Already delivered by the backfill.
            if matches!(log.block_number, Some(block) if block.as_u64() <= head) {
                continue;
            }
            if sink.send(log).await.is_err() {
                return Ok(());
            }
        }

        Err(WatchError::SubscriptionClosed { chain: self.chain_name.clone() })
    }
}

/// Decodes the logs of a [`LogSource`] into deposits.
pub struct ChainWatcher<L: LogSource> {
    source: Arc<L>,
    buffer: usize,
}

impl<L: LogSource> ChainWatcher<L> {
    pub fn new(source: Arc<L>, buffer: usize) -> Self {
        ChainWatcher { source, buffer: buffer.max(1) }
    }

    pub fn chain_name(&self) -> &str {
        self.source.chain_name()
    }

    /// Forwards deposits from `from_block` on until the subscription ends, then reports the
    /// disconnect. Undecodable logs are reported and skipped. Returns early if `events` is closed.
    /// Dropping the returned future drops the subscription with it.
    pub async fn run(&self, from_block: u64, events: mpsc::Sender<WatchEvent>) {
        let (log_sender, mut logs) = mpsc::channel(self.buffer);
        let subscription = self.source.stream_logs(from_block, log_sender);
        tokio::pin!(subscription);
        debug!("Watching {} from block {}", self.chain_name(), from_block);

        let outcome = loop {
            tokio::select! {
                outcome = &mut subscription => break outcome,
                Some(log) = logs.recv() => {
                    if !self.forward(&log, &events).await {
                        return;
                    }
                }
            }
        };
        // Logs the source pushed before failing still go out ahead of the disconnect.
        while let Some(log) = logs.recv().await {
            if !self.forward(&log, &events).await {
                return;
            }
        }

        let error = match outcome {
            Ok(()) => WatchError::SubscriptionClosed { chain: self.chain_name().to_string() },
            Err(e) => e,
        };
        warn!("Watcher on {} stopped: {}", self.chain_name(), error);
        let _ = events.send(WatchEvent::Disconnected(error)).await;
    }

    async fn forward(&self, log: &Log, events: &mpsc::Sender<WatchEvent>) -> bool {
        match decode_deposit(log) {
            Ok(record) => events.send(WatchEvent::Deposit(record)).await.is_ok(),
            Err(e) => {
                warn!("Dropping log from {} ({}): {}", self.chain_name(), describe_log(log), e);
                true
            }
        }
    }
}
