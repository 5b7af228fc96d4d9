use crate::byte_utils::{proof_to_evm_bytes, public_inputs_to_bytes};
use crate::error::ZkError;
use crate::state_transition_circuit::{CircuitShape, StateTransitionCircuit};
use crate::witness::StateTransitionWitness;
use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, PreparedVerifyingKey, ProvingKey, VerifyingKey};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystem};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use borsh::{BorshDeserialize, BorshSerialize};
use log::{debug, info};
use rand::rngs::ThreadRng;
use rand::{thread_rng, CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub const PROVING_KEY_FILE: &str = "proving_key.bin";
pub const VERIFYING_KEY_FILE: &str = "verifying_key.bin";
pub const HEADER_FILE: &str = "shape.bin";

/// Proof in the layout the destination verifier takes, plus its public inputs as big-endian words.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProofPackage {
    pub proof: Vec<u8>,
    pub public_inputs: Vec<[u8; 32]>,
}

impl ProofPackage {
    pub fn previous_root(&self) -> Option<[u8; 32]> {
        self.public_inputs.first().copied()
    }

    pub fn new_root(&self) -> Option<[u8; 32]> {
        self.public_inputs.get(1).copied()
    }

    /// Slot the proven record was appended to. The verifier must hold exactly this many leaves.
    pub fn leaf_index(&self) -> Option<u64> {
        let word = self.public_inputs.get(8)?;
        if word[..24].iter().any(|byte| *byte != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&word[24..]);
        Some(u64::from_be_bytes(low))
    }
}

/// Turns a state transition witness into a proof package.
pub trait TransitionProver: Send + Sync + 'static {
    fn prove_transition(&self, witness: &StateTransitionWitness) -> Result<ProofPackage, ZkError>;
}

#[derive(BorshSerialize, BorshDeserialize)]
struct ArtifactHeader {
    shape: CircuitShape,
    verifying_key_digest: [u8; 32],
}

/// Keys for one circuit shape. Generated once and shared by every proof.
pub struct ProvingArtifacts {
    pub shape: CircuitShape,
    pub proving_key: ProvingKey<Bn254>,
    pub verifying_key: VerifyingKey<Bn254>,
    pub prepared_verifying_key: PreparedVerifyingKey<Bn254>,
}

impl ProvingArtifacts {
    pub fn setup<R: RngCore + CryptoRng>(shape: CircuitShape, rng: &mut R) -> Result<Self, ZkError> {
        let started = Instant::now();
        let (proving_key, verifying_key) =
            Groth16::<Bn254>::circuit_specific_setup(StateTransitionCircuit::blank(shape), rng)
                .map_err(|e| ZkError::Artifacts(format!("setup failed: {}", e)))?;
        let prepared_verifying_key = Groth16::<Bn254>::process_vk(&verifying_key)
            .map_err(|e| ZkError::Artifacts(format!("preparing verifying key failed: {}", e)))?;
        info!("Generated proving artifacts for {:?} in {:?}", shape, started.elapsed());

        Ok(ProvingArtifacts {
            shape,
            proving_key,
            verifying_key,
            prepared_verifying_key,
        })
    }

    pub fn save(&self, dir: &Path) -> Result<(), ZkError> {
        fs::create_dir_all(dir)?;

        let mut pk_bytes = Vec::new();
        self.proving_key.serialize_uncompressed(&mut pk_bytes)?;
        let mut vk_bytes = Vec::new();
        self.verifying_key.serialize_uncompressed(&mut vk_bytes)?;
        let header = ArtifactHeader {
            shape: self.shape,
            verifying_key_digest: Sha256::digest(&vk_bytes).into(),
        };

        fs::write(dir.join(PROVING_KEY_FILE), pk_bytes)?;
        fs::write(dir.join(VERIFYING_KEY_FILE), vk_bytes)?;
        // Written last: a directory with a header always has both keys.
        fs::write(dir.join(HEADER_FILE), borsh::to_vec(&header)?)?;
        debug!("Saved proving artifacts to {}", dir.display());
        Ok(())
    }

    /// Loads previously saved artifacts. `Ok(None)` if the directory holds none.
    pub fn load(dir: &Path) -> Result<Option<Self>, ZkError> {
        let header_path = dir.join(HEADER_FILE);
        if !header_path.exists() {
            return Ok(None);
        }
        let header = borsh::from_slice::<ArtifactHeader>(&fs::read(header_path)?)?;

        let vk_bytes = fs::read(dir.join(VERIFYING_KEY_FILE))?;
        let digest: [u8; 32] = Sha256::digest(&vk_bytes).into();
        if digest != header.verifying_key_digest {
            return Err(ZkError::Artifacts("verifying key does not match the artifact header".to_string()));
        }
        let verifying_key = VerifyingKey::<Bn254>::deserialize_uncompressed(&vk_bytes[..])?;
        let pk_bytes = fs::read(dir.join(PROVING_KEY_FILE))?;
        let proving_key = ProvingKey::<Bn254>::deserialize_uncompressed_unchecked(&pk_bytes[..])?;
        if proving_key.vk != verifying_key {
            return Err(ZkError::Artifacts("proving key belongs to a different verifying key".to_string()));
        }
        let prepared_verifying_key = Groth16::<Bn254>::process_vk(&verifying_key)
            .map_err(|e| ZkError::Artifacts(format!("preparing verifying key failed: {}", e)))?;

        Ok(Some(ProvingArtifacts {
            shape: header.shape,
            proving_key,
            verifying_key,
            prepared_verifying_key,
        }))
    }

    /// Reuses the artifacts in `dir` or runs the setup once and persists the result. Artifacts for
    /// another shape are an error: replacing them would invalidate the deployed verifier.
    pub fn load_or_setup(shape: CircuitShape, dir: &Path) -> Result<Self, ZkError> {
        if let Some(artifacts) = Self::load(dir)? {
            if artifacts.shape != shape {
                return Err(ZkError::ShapeMismatch { expected: shape, found: artifacts.shape });
            }
            info!("Loaded proving artifacts from {}", dir.display());
            return Ok(artifacts);
        }

        info!("No proving artifacts in {}, running setup", dir.display());
        let artifacts = Self::setup(shape, &mut thread_rng())?;
        artifacts.save(dir)?;
        Ok(artifacts)
    }
}

/// Turns witnesses into proofs with a fixed set of artifacts.
#[derive(Clone)]
pub struct ProofGenerator {
    artifacts: Arc<ProvingArtifacts>,
}

impl ProofGenerator {
    pub fn new(artifacts: Arc<ProvingArtifacts>) -> Self {
        ProofGenerator { artifacts }
    }

    pub fn artifacts(&self) -> &ProvingArtifacts {
        &self.artifacts
    }

    /// Checks the witness against the constraint system without proving.
    pub fn check_witness(&self, witness: &StateTransitionWitness) -> Result<(), ZkError> {
        let shape = self.artifacts.shape;
        if witness.merkle_path.depth() > shape.max_depth() {
            return Err(ZkError::Circuit(format!(
                "path depth {} exceeds circuit depth {}",
                witness.merkle_path.depth(),
                shape.max_depth()
            )));
        }
        if witness.merkle_path.leaf_index() != witness.leaf_index {
            return Err(ZkError::Circuit(format!(
                "path leads to leaf {}, not leaf {}",
                witness.merkle_path.leaf_index(),
                witness.leaf_index
            )));
        }
        if !shape.progression.allows(witness.previous_block_number, witness.block_number) {
            return Err(ZkError::Circuit(format!(
                "block {} does not follow block {} under {:?}",
                witness.block_number, witness.previous_block_number, shape.progression
            )));
        }

        let cs = ConstraintSystem::<Fr>::new_ref();
        StateTransitionCircuit::new(shape, witness.clone())
            .generate_constraints(cs.clone())
            .map_err(|e| ZkError::Circuit(e.to_string()))?;
        if !cs.is_satisfied().map_err(ZkError::proving)? {
            let unsatisfied = cs.which_is_unsatisfied().map_err(ZkError::proving)?;
            return Err(ZkError::Circuit(format!(
                "unsatisfied constraint {}",
                unsatisfied.unwrap_or_default()
            )));
        }
        Ok(())
    }

    pub fn prove(&self, witness: &StateTransitionWitness) -> Result<ProofPackage, ZkError> {
        let mut rng: ThreadRng = thread_rng();
        self.prove_with_rng(witness, &mut rng)
    }

    /// Proves the transition and verifies the proof locally before handing it out.
    pub fn prove_with_rng<R: RngCore + CryptoRng>(&self, witness: &StateTransitionWitness, rng: &mut R) -> Result<ProofPackage, ZkError> {
        self.check_witness(witness)?;

        let started = Instant::now();
        let circuit = StateTransitionCircuit::new(self.artifacts.shape, witness.clone());
        let proof = Groth16::<Bn254>::prove(&self.artifacts.proving_key, circuit, rng).map_err(ZkError::proving)?;

        let public_inputs = witness.public_inputs();
        let valid = Groth16::<Bn254>::verify_with_processed_vk(&self.artifacts.prepared_verifying_key, &public_inputs, &proof)
            .map_err(ZkError::proving)?;
        if !valid {
            return Err(ZkError::Proving("generated proof failed local verification".to_string()));
        }
        debug!("Proved transition to block {} in {:?}", witness.block_number, started.elapsed());

        Ok(ProofPackage {
            proof: proof_to_evm_bytes(&proof),
            public_inputs: public_inputs_to_bytes(&public_inputs),
        })
    }
}

impl TransitionProver for ProofGenerator {
    fn prove_transition(&self, witness: &StateTransitionWitness) -> Result<ProofPackage, ZkError> {
        self.prove(witness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify_package;
    use lazy_static::lazy_static;
    use merkle::merkle_tree::MerkleTree;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use state::progression::BlockProgression;
    use state::transaction::{token_id_from_u64, TransactionRecord};

    const DEPTH: usize = 4;

    lazy_static! {
        static ref ARTIFACTS: Arc<ProvingArtifacts> = Arc::new(
            ProvingArtifacts::setup(
                CircuitShape::new(DEPTH, BlockProgression::NonDecreasing),
                &mut StdRng::seed_from_u64(7)
            )
            .unwrap()
        );
    }

    fn witnesses(count: u64) -> Vec<StateTransitionWitness> {
        let mut tree = MerkleTree::new();
        let mut previous_block = 1_000;
        (0..count)
            .map(|i| {
                let record = TransactionRecord::new(token_id_from_u64(i + 1), [7u8; 20], [8u8; 20], 1_000 + i / 2, i % 2);
                let insertion = tree.append_record(&record).unwrap();
                let witness = StateTransitionWitness::new(&record, &insertion, previous_block);
                previous_block = record.block_number;
                witness
            })
            .collect()
    }

    #[test]
    fn proofs_chain_and_verify() {
        let generator = ProofGenerator::new(ARTIFACTS.clone());
        let mut rng = StdRng::seed_from_u64(11);
        let packages: Vec<ProofPackage> = witnesses(3)
            .iter()
            .map(|witness| generator.prove_with_rng(witness, &mut rng).unwrap())
            .collect();

        for package in &packages {
            assert_eq!(package.proof.len(), crate::byte_utils::EVM_PROOF_LEN);
            assert!(verify_package(&ARTIFACTS.prepared_verifying_key, package).unwrap());
        }
        for pair in packages.windows(2) {
            assert_eq!(pair[1].previous_root(), pair[0].new_root());
        }
        let indices: Vec<Option<u64>> = packages.iter().map(ProofPackage::leaf_index).collect();
        assert_eq!(indices, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn witness_with_foreign_leaf_index_is_refused() {
        let generator = ProofGenerator::new(ARTIFACTS.clone());
        let mut witness = witnesses(3).pop().unwrap();
        witness.leaf_index = 1;
        assert!(matches!(generator.check_witness(&witness), Err(ZkError::Circuit(_))));
    }

    #[test]
    fn tampered_witness_produces_no_proof() {
        let generator = ProofGenerator::new(ARTIFACTS.clone());
        let mut witness = witnesses(2).pop().unwrap();
        witness.to = [9u8; 20];
        match generator.prove(&witness) {
            Err(ZkError::Circuit(_)) => {}
            other => panic!("expected a circuit error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn regressing_block_is_rejected_before_synthesis() {
        let generator = ProofGenerator::new(ARTIFACTS.clone());
        let mut witness = witnesses(2).pop().unwrap();
        witness.previous_block_number = witness.block_number + 1;
        let error = generator.check_witness(&witness).unwrap_err();
        assert!(matches!(error, ZkError::Circuit(_)));
        assert!(!error.is_retryable());
    }

    #[test]
    fn artifacts_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        ARTIFACTS.save(dir.path()).unwrap();

        let loaded = ProvingArtifacts::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.shape, ARTIFACTS.shape);
        assert_eq!(loaded.verifying_key, ARTIFACTS.verifying_key);

        let reused = ProvingArtifacts::load_or_setup(ARTIFACTS.shape, dir.path()).unwrap();
        assert_eq!(reused.verifying_key, ARTIFACTS.verifying_key);
    }

    #[test]
    fn artifacts_for_another_shape_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        ARTIFACTS.save(dir.path()).unwrap();
        let other = CircuitShape::new(DEPTH, BlockProgression::Consecutive);
        assert!(matches!(
            ProvingArtifacts::load_or_setup(other, dir.path()),
            Err(ZkError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn missing_artifacts_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProvingArtifacts::load(dir.path()).unwrap().is_none());
    }
}
