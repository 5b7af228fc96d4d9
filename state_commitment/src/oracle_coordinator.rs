use crate::accumulator::SharedAccumulator;
use crate::error::{OracleError, Stage};
use bridge_zk::error::ZkError;
use bridge_zk::prove::{ProofGenerator, ProofPackage, TransitionProver};
use bridge_zk::witness::StateTransitionWitness;
use chain::submitter::{ProofSubmitter, SubmissionReceipt};
use chain::watcher::{ChainWatcher, LogSource, WatchError, WatchEvent};
use log::{debug, error, info, warn};
use merkle::hash::field_to_be_bytes;
use state::config::OracleConfig;
use state::transaction::{EventId, TransactionRecord};
use state_management::state_management::ManageState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleState {
    Idle,
    Watching,
    Processing,
    Proving,
    Submitting,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub max_proving_attempts: u32,
    pub max_submission_attempts: u32,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Zero reconnects forever.
    pub max_reconnect_attempts: u32,
    pub event_buffer: usize,
}

impl CoordinatorSettings {
    pub fn from_config(config: &OracleConfig) -> Self {
        CoordinatorSettings {
            max_proving_attempts: config.max_proving_attempts,
            max_submission_attempts: config.max_submission_attempts,
            retry_backoff: config.retry_backoff(),
            max_backoff: config.max_backoff(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            event_buffer: config.event_buffer,
        }
    }

    /// Delay before retry `attempt` (zero based), doubling up to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

enum Processed {
    Confirmed,
    Skipped,
    Aborted,
}

enum Interrupted {
    Shutdown,
    Disconnected(WatchError),
    Halted(OracleError),
}

/// Drives deposits through accumulate, prove and submit, one event at a time.
///
/// An event's leaf is only committed once its proof is confirmed on the destination chain, so the
/// next proof always builds on a root the verifier has accepted.
pub struct OracleCoordinator<L, S, M, P = ProofGenerator>
where
    L: LogSource,
    S: ProofSubmitter,
    M: ManageState<Record = TransactionRecord>,
{
    watcher: Arc<ChainWatcher<L>>,
    submitter: Arc<S>,
    prover: Arc<P>,
    accumulator: SharedAccumulator<M>,
    settings: CoordinatorSettings,
    state: watch::Sender<OracleState>,
}

impl<L, S, M, P> OracleCoordinator<L, S, M, P>
where
    L: LogSource,
    S: ProofSubmitter,
    M: ManageState<Record = TransactionRecord> + Send + Sync + 'static,
    P: TransitionProver,
{
    pub fn new(
        watcher: ChainWatcher<L>,
        submitter: Arc<S>,
        prover: P,
        accumulator: SharedAccumulator<M>,
        settings: CoordinatorSettings,
    ) -> Self {
        let (state, _) = watch::channel(OracleState::Idle);
        OracleCoordinator {
            watcher: Arc::new(watcher),
            submitter,
            prover: Arc::new(prover),
            accumulator,
            settings,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OracleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> OracleState {
        *self.state.borrow()
    }

    pub fn accumulator(&self) -> SharedAccumulator<M> {
        self.accumulator.clone()
    }

    fn set_state(&self, state: OracleState) {
        self.state.send_replace(state);
    }

    /// Runs until `shutdown` turns true or the pipeline halts. Returns `Ok` on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OracleError> {
        let mut reconnects = 0u32;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let from_block = self.accumulator.read().await.cursor().resume_block();
            self.set_state(OracleState::Watching);

            let (sender, mut events) = mpsc::channel(self.settings.event_buffer.max(1));
            let watcher = self.watcher.clone();
            let watch_task = tokio::spawn(async move { watcher.run(from_block, sender).await });
            let interrupted = self.consume(&mut events, &mut shutdown, &mut reconnects).await;
            watch_task.abort();

            match interrupted {
                Interrupted::Shutdown => break,
                Interrupted::Halted(e) => return Err(self.halt(e)),
                Interrupted::Disconnected(e) => {
                    reconnects += 1;
                    let limit = self.settings.max_reconnect_attempts;
                    if limit > 0 && reconnects > limit {
                        let chain = self.watcher.chain_name().to_string();
                        return Err(self.halt(OracleError::Watch { chain, attempts: limit, source: e }));
                    }
                    let delay = self.settings.backoff(reconnects - 1);
                    warn!("Lost {} ({}), reconnecting in {:?}", self.watcher.chain_name(), e, delay);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }

        self.set_state(OracleState::Idle);
        info!("Oracle stopped at root 0x{}", hex::encode(self.accumulator.read().await.root_bytes()));
        Ok(())
    }

    fn halt(&self, e: OracleError) -> OracleError {
        self.set_state(OracleState::Failed);
        match e.event() {
            Some(event) => error!("Halting on event {} while {}: {}", event, e.stage(), e),
            None => error!("Halting while {}: {}", e.stage(), e),
        }
        e
    }

    async fn consume(
        &self,
        events: &mut mpsc::Receiver<WatchEvent>,
        shutdown: &mut watch::Receiver<bool>,
        reconnects: &mut u32,
    ) -> Interrupted {
        loop {
            let event = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return Interrupted::Shutdown,
                event = events.recv() => event,
            };
            match event {
                Some(WatchEvent::Deposit(record)) => match self.process(record, shutdown).await {
                    Ok(Processed::Confirmed) => {
                        *reconnects = 0;
                        self.set_state(OracleState::Watching);
                    }
                    Ok(Processed::Skipped) => self.set_state(OracleState::Watching),
                    Ok(Processed::Aborted) => return Interrupted::Shutdown,
                    Err(e) => return Interrupted::Halted(e),
                },
                Some(WatchEvent::Disconnected(e)) => return Interrupted::Disconnected(e),
                None => return Interrupted::Disconnected(WatchError::Task("watcher ended without a report".to_string())),
            }
        }
    }

    async fn process(&self, record: TransactionRecord, shutdown: &watch::Receiver<bool>) -> Result<Processed, OracleError> {
        let event = record.event_id();
        self.set_state(OracleState::Processing);

        {
            let accumulator = self.accumulator.read().await;
            if accumulator.cursor().covers(&event) {
                match accumulator.leaf_index_of(&record) {
                    Ok(Some(leaf)) => debug!("Skipping event {}, already committed as leaf {}", event, leaf),
                    Ok(None) => debug!("Skipping event {}, already covered by the cursor", event),
                    Err(e) => warn!("Skipping event {}, leaf lookup failed: {}", event, e),
                }
                return Ok(Processed::Skipped);
            }
        }
        if *shutdown.borrow() {
            info!("Shutdown requested, event {} is left for the next run", event);
            return Ok(Processed::Aborted);
        }

        let witness = {
            let mut accumulator = self.accumulator.write().await;
            let staged = accumulator
                .insert(record)
                .map_err(|e| OracleError::accumulator(event, Stage::Accumulating, e))?;
            StateTransitionWitness::new(&staged.record, &staged.insertion, staged.previous_block_number)
        };
        if *shutdown.borrow() {
            self.abandon(event).await;
            return Ok(Processed::Aborted);
        }

        self.set_state(OracleState::Proving);
        let package = match self.prove(event, witness).await {
            Ok(package) => package,
            Err(e) => {
                self.abandon(event).await;
                return Err(e);
            }
        };
        if *shutdown.borrow() {
            self.abandon(event).await;
            return Ok(Processed::Aborted);
        }

        self.set_state(OracleState::Submitting);
        let receipt = match self.submit(event, &package).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.abandon(event).await;
                return Err(e);
            }
        };

        let inserted = self
            .accumulator
            .write()
            .await
            .commit()
            .map_err(|e| OracleError::accumulator(event, Stage::Committing, e))?;
        self.set_state(OracleState::Confirmed);
        info!(
            "Committed event {} as leaf {} with root 0x{} in tx 0x{} (block {}, {} broadcasts)",
            event,
            inserted.leaf_index,
            hex::encode(field_to_be_bytes(&inserted.new_root)),
            hex::encode(receipt.tx_hash),
            receipt.block_number,
            receipt.broadcasts
        );
        Ok(Processed::Confirmed)
    }

    async fn abandon(&self, event: EventId) {
        if self.accumulator.write().await.abandon().is_some() {
            info!("Abandoned staged insert of event {}", event);
        }
    }

    async fn prove(&self, event: EventId, witness: StateTransitionWitness) -> Result<ProofPackage, OracleError> {
        let attempts = self.settings.max_proving_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let prover = self.prover.clone();
            let job = witness.clone();
            let result = tokio::task::spawn_blocking(move || prover.prove_transition(&job))
                .await
                .unwrap_or_else(|e| Err(ZkError::Proving(format!("proving task failed: {}", e))));

            match result {
                Ok(package) => return Ok(package),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.settings.backoff(attempt - 1);
                    warn!("Proving event {} failed ({}/{}), retrying in {:?}: {}", event, attempt, attempts, delay, e);
                    sleep(delay).await;
                }
                Err(e) => return Err(OracleError::proving(event, attempt, e)),
            }
        }
    }

    async fn submit(&self, event: EventId, package: &ProofPackage) -> Result<SubmissionReceipt, OracleError> {
        let attempts = self.settings.max_submission_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.submitter.submit(package).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.settings.backoff(attempt - 1);
                    warn!(
                        "Submitting event {} to {} failed ({}/{}), retrying in {:?}: {}",
                        event,
                        self.submitter.chain_name(),
                        attempt,
                        attempts,
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(OracleError::submission(event, attempt, e)),
            }
        }
    }
}

/// Completes once the flag is set. Never completes if the sender is gone without setting it.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            max_proving_attempts: 3,
            max_submission_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            max_reconnect_attempts: 0,
            event_buffer: 8,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let settings = settings();
        assert_eq!(settings.backoff(0), Duration::from_millis(100));
        assert_eq!(settings.backoff(1), Duration::from_millis(200));
        assert_eq!(settings.backoff(3), Duration::from_millis(800));
        assert_eq!(settings.backoff(4), Duration::from_secs(1));
        assert_eq!(settings.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn settings_follow_config() {
        let config = OracleConfig { max_reconnect_attempts: 7, retry_backoff_ms: 250, ..OracleConfig::default() };
        let settings = CoordinatorSettings::from_config(&config);
        assert_eq!(settings.max_reconnect_attempts, 7);
        assert_eq!(settings.retry_backoff, Duration::from_millis(250));
        assert_eq!(settings.event_buffer, config.event_buffer);
    }

    #[tokio::test]
    async fn shutdown_wait_ignores_dropped_sender() {
        let (sender, mut receiver) = watch::channel(false);
        drop(sender);
        let waited = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut receiver)).await;
        assert!(waited.is_err());

        let (sender, mut receiver) = watch::channel(false);
        sender.send_replace(true);
        wait_for_shutdown(&mut receiver).await;
    }
}
