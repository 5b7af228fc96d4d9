use crate::state_transition_circuit::CircuitShape;
use ark_relations::r1cs::SynthesisError;
use ark_serialize::SerializationError;
use merkle::hash::HashError;

#[derive(Debug, thiserror::Error)]
pub enum ZkError {
    #[error("Witness violates the circuit: {0}")]
    Circuit(String),
    #[error("Proving failed: {0}")]
    Proving(String),
    #[error("Proving artifacts are unusable: {0}")]
    Artifacts(String),
    #[error("Artifacts were built for {found:?}, expected {expected:?}")]
    ShapeMismatch { expected: CircuitShape, found: CircuitShape },
    #[error("Malformed proof package: {0}")]
    Encoding(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
}

impl ZkError {
    pub fn proving(error: SynthesisError) -> Self {
        ZkError::Proving(error.to_string())
    }

    /// Resource or backend failures may succeed on another attempt, a bad witness never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ZkError::Proving(_) | ZkError::Io(_))
    }
}
