use crate::accumulator::AccumulatorError;
use bridge_zk::error::ZkError;
use chain::submitter::SubmitError;
use chain::watcher::WatchError;
use state::transaction::EventId;
use std::fmt;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Watching,
    Accumulating,
    Proving,
    Submitting,
    Committing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Watching => "watching",
            Stage::Accumulating => "accumulating",
            Stage::Proving => "proving",
            Stage::Submitting => "submitting",
            Stage::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// Errors that stop the pipeline. Each carries the event, stage and chain it happened on.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("accumulator failed while {stage} event {event}: {source}")]
    Accumulator {
        event: EventId,
        stage: Stage,
        #[source]
        source: AccumulatorError,
    },
    #[error("event {event} violates the circuit: {reason}")]
    Circuit { event: EventId, reason: String },
    #[error("proving event {event} failed after {attempts} attempts: {reason}")]
    Proving { event: EventId, attempts: u32, reason: String },
    #[error("submitting event {event} to {chain} failed after {attempts} attempts: {reason}")]
    SubmissionNetwork { event: EventId, chain: String, attempts: u32, reason: String },
    #[error("verifier on {chain} rejected the proof for event {event}: {reason}")]
    SubmissionRevert { event: EventId, chain: String, reason: String, tx_hash: Option<[u8; 32]> },
    #[error("watcher on {chain} gave up after {attempts} reconnects: {source}")]
    Watch {
        chain: String,
        attempts: u32,
        #[source]
        source: WatchError,
    },
}

impl OracleError {
    pub fn accumulator(event: EventId, stage: Stage, source: AccumulatorError) -> Self {
        OracleError::Accumulator { event, stage, source }
    }

    pub fn proving(event: EventId, attempts: u32, error: ZkError) -> Self {
        match error {
            ZkError::Circuit(reason) => OracleError::Circuit { event, reason },
            other => OracleError::Proving { event, attempts, reason: other.to_string() },
        }
    }

    pub fn submission(event: EventId, attempts: u32, error: SubmitError) -> Self {
        match error {
            SubmitError::Network { chain, reason } => OracleError::SubmissionNetwork { event, chain, attempts, reason },
            SubmitError::Reverted { chain, reason, tx_hash } => OracleError::SubmissionRevert { event, chain, reason, tx_hash },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            OracleError::Accumulator { stage, .. } => *stage,
            OracleError::Circuit { .. } | OracleError::Proving { .. } => Stage::Proving,
            OracleError::SubmissionNetwork { .. } | OracleError::SubmissionRevert { .. } => Stage::Submitting,
            OracleError::Watch { .. } => Stage::Watching,
        }
    }

    pub fn event(&self) -> Option<EventId> {
        match self {
            OracleError::Accumulator { event, .. }
            | OracleError::Circuit { event, .. }
            | OracleError::Proving { event, .. }
            | OracleError::SubmissionNetwork { event, .. }
            | OracleError::SubmissionRevert { event, .. } => Some(*event),
            OracleError::Watch { .. } => None,
        }
    }
}
