use anyhow::{Context, Result as AnyResult};
use bridge_zk::prove::{ProofGenerator, ProvingArtifacts};
use bridge_zk::state_transition_circuit::CircuitShape;
use chain::submitter::{EvmProofSubmitter, SubmitterSettings};
use chain::watcher::{ChainWatcher, EthersLogSource};
use log::{error, info};
use state::config::{OracleConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use state::transaction::TransactionRecord;
use state_commitment::accumulator::PersistentAccumulator;
use state_commitment::oracle_coordinator::{CoordinatorSettings, OracleCoordinator};
use state_management::sled_state_management::SledStateManagement;
use state_management::state_management::StateManager;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

const SOURCE_CHAIN: &str = "source";
const DESTINATION_CHAIN: &str = "destination";

#[tokio::main]
async fn main() -> AnyResult<()> {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = OracleConfig::load(&config_path).with_context(|| format!("loading configuration from {}", config_path))?;
    info!(
        "Starting bridge oracle: depth {}, {:?} blocks, starting at block {}",
        config.max_tree_depth, config.block_progression, config.start_block
    );

    // Keys are generated once per circuit shape and reused across restarts.
    let shape = CircuitShape::new(config.max_tree_depth, config.block_progression);
    let artifacts_dir = PathBuf::from(&config.artifacts_dir);
    let artifacts = tokio::task::spawn_blocking(move || ProvingArtifacts::load_or_setup(shape, &artifacts_dir))
        .await
        .context("proving setup task failed")?
        .context("preparing proving artifacts")?;
    let prover = ProofGenerator::new(Arc::new(artifacts));

    let store = StateManager::<SledStateManagement<TransactionRecord>>::open(&config.accumulator_db_path)
        .with_context(|| format!("opening accumulator store at {}", config.accumulator_db_path))?;
    let accumulator = PersistentAccumulator::open(store, config.start_block).context("opening accumulator")?;
    info!("Accumulator holds {} leaves", accumulator.len());

    let source = EthersLogSource::new(
        SOURCE_CHAIN,
        &config.source_rpc_url,
        &config.source_contract,
        config.source_request_timeout(),
    )?;
    let submitter = EvmProofSubmitter::new(
        DESTINATION_CHAIN,
        &config.destination_rpc_url,
        &config.verifier_contract,
        &config.signing_key,
        SubmitterSettings::from_config(&config),
    )?;

    let coordinator = OracleCoordinator::new(
        ChainWatcher::new(Arc::new(source), config.event_buffer),
        Arc::new(submitter),
        prover,
        accumulator.shared(),
        CoordinatorSettings::from_config(&config),
    );

    let (shutdown, shutdown_receiver) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                shutdown.send_replace(true);
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    coordinator.run(shutdown_receiver).await?;
    info!("Bridge oracle stopped");
    Ok(())
}
