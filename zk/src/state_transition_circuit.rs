use crate::poseidon_gadget::PoseidonGadget;
use crate::witness::{PathLevel, StateTransitionWitness};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ark_r1cs_std::alloc::AllocVar;
use ark_r1cs_std::boolean::Boolean;
use ark_r1cs_std::eq::EqGadget;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::fields::FieldVar;
use ark_r1cs_std::R1CSVar;
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
use borsh::{BorshDeserialize, BorshSerialize};
use merkle::hash::LEAF_INPUTS;
use state::progression::BlockProgression;

/// Block distances are range checked to this many bits.
const BLOCK_DISTANCE_BITS: usize = 64;

/// Everything that changes the constraint system, and therefore the keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CircuitShape {
    pub max_depth: u32,
    pub progression: BlockProgression,
}

impl CircuitShape {
    pub fn new(max_depth: usize, progression: BlockProgression) -> Self {
        CircuitShape { max_depth: max_depth as u32, progression }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth as usize
    }
}

// Circuit for proving that one record was appended to the accumulator.
//
// Public inputs, in order: previous root, new root, block number, token id high, token id low,
// from, to, previous block number, leaf index.
// Private inputs: for every one of `max_depth` levels a sibling and a direction bit.
//
// The direction bits are the little-endian bits of the leaf index, so the path can only lead to
// the slot the index names. Level k is active iff index >= 2^k, which gives exactly
// ceil_log2(index + 1) active levels. Siblings on the right of the path must be empty, as they
// are for the slot after the last leaf.
//
// Both roots are recomputed over the same path: from the empty slot the walk must reach the
// previous root, from the record's leaf it must reach the new root. Inactive levels pass the
// running hash through unchanged, so one circuit serves every tree depth up to `max_depth`.
#[derive(Clone)]
pub struct StateTransitionCircuit {
    pub shape: CircuitShape,
    pub witness: Option<StateTransitionWitness>,
}

struct LevelVars {
    sibling: FpVar<Fr>,
    is_right: Boolean<Fr>,
    active: Boolean<Fr>,
}

impl StateTransitionCircuit {

    /// Circuit without assignments, used for key generation.
    pub fn blank(shape: CircuitShape) -> Self {
        StateTransitionCircuit { shape, witness: None }
    }

    pub fn new(shape: CircuitShape, witness: StateTransitionWitness) -> Self {
        StateTransitionCircuit { shape, witness: Some(witness) }
    }

    pub fn public_inputs(&self) -> Option<Vec<Fr>> {
        self.witness.as_ref().map(|witness| witness.public_inputs())
    }

    // One level of the walk. Both hash orderings are computed and the direction bit picks one;
    // an empty right child promotes the left one; an inactive level returns its input.
    fn step(hasher: &PoseidonGadget, current: &FpVar<Fr>, level: &LevelVars) -> Result<FpVar<Fr>, SynthesisError> {
        let current_left = hasher.hash(&[current.clone(), level.sibling.clone()])?;
        let current_right = hasher.hash(&[level.sibling.clone(), current.clone()])?;
        let hashed = level.is_right.select(&current_right, &current_left)?;

        let left = level.is_right.select(&level.sibling, current)?;
        let right = level.is_right.select(current, &level.sibling)?;
        let parent = right.is_eq(&FpVar::zero())?.select(&left, &hashed)?;

        level.active.select(&parent, current)
    }

    fn walk(hasher: &PoseidonGadget, start: FpVar<Fr>, levels: &[LevelVars]) -> Result<FpVar<Fr>, SynthesisError> {
        levels.iter().try_fold(start, |current, level| Self::step(hasher, &current, level))
    }

    fn enforce_progression(
        cs: ConstraintSystemRef<Fr>,
        progression: BlockProgression,
        previous_block_number: &FpVar<Fr>,
        block_number: &FpVar<Fr>,
    ) -> Result<(), SynthesisError> {
        if progression.is_exact() {
            return block_number.enforce_equal(&(previous_block_number + Fr::from(1u64)));
        }

        // block - previous - min_step must be a 64-bit value, i.e. no wrap around the field.
        let distance = block_number - previous_block_number - Fr::from(progression.min_step());
        let bits = (0..BLOCK_DISTANCE_BITS)
            .map(|i| {
                Boolean::new_witness(cs.clone(), || {
                    Ok(distance.value()?.into_bigint().get_bit(i))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Boolean::le_bits_to_fp_var(&bits)?.enforce_equal(&distance)
    }
}

impl ConstraintSynthesizer<Fr> for StateTransitionCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let max_depth = self.shape.max_depth();
        let witness = self.witness.as_ref();
        let public = self.public_inputs();
        let public_input = |index: usize| -> Result<Fr, SynthesisError> {
            public
                .as_ref()
                .map(|inputs| inputs[index])
                .ok_or(SynthesisError::AssignmentMissing)
        };

        // Allocate public inputs
        let previous_root = FpVar::new_input(cs.clone(), || public_input(0))?;
        let new_root = FpVar::new_input(cs.clone(), || public_input(1))?;
        let block_number = FpVar::new_input(cs.clone(), || public_input(2))?;
        let token_id_hi = FpVar::new_input(cs.clone(), || public_input(3))?;
        let token_id_lo = FpVar::new_input(cs.clone(), || public_input(4))?;
        let from = FpVar::new_input(cs.clone(), || public_input(5))?;
        let to = FpVar::new_input(cs.clone(), || public_input(6))?;
        let previous_block_number = FpVar::new_input(cs.clone(), || public_input(7))?;
        let leaf_index = FpVar::new_input(cs.clone(), || public_input(8))?;

        // Allocate the padded path
        let padded: Option<Vec<PathLevel>> = match witness {
            Some(witness) => Some(witness.padded_path(max_depth).ok_or(SynthesisError::Unsatisfiable)?),
            None => None,
        };
        let level_value = |index: usize| -> Result<PathLevel, SynthesisError> {
            padded
                .as_ref()
                .map(|levels| levels[index])
                .ok_or(SynthesisError::AssignmentMissing)
        };
        let mut siblings = Vec::with_capacity(max_depth);
        let mut directions = Vec::with_capacity(max_depth);
        for index in 0..max_depth {
            siblings.push(FpVar::new_witness(cs.clone(), || level_value(index).map(|level| level.sibling))?);
            directions.push(Boolean::new_witness(cs.clone(), || level_value(index).map(|level| level.is_right))?);
        }

        // The direction bits spell out the leaf index
        Boolean::le_bits_to_fp_var(&directions)?.enforce_equal(&leaf_index)?;

        // Active levels are those at or below the index's highest set bit
        let mut active = vec![Boolean::FALSE; max_depth];
        let mut above = Boolean::FALSE;
        for index in (0..max_depth).rev() {
            above = above.or(&directions[index])?;
            active[index] = above.clone();
        }

        let mut levels = Vec::with_capacity(max_depth);
        for ((sibling, is_right), active) in siblings.into_iter().zip(directions).zip(active) {
            // Nothing has been appended to the right of the slot yet
            sibling.conditional_enforce_equal(&FpVar::zero(), &is_right.not())?;
            levels.push(LevelVars { sibling, is_right, active });
        }

        let pair_hasher = PoseidonGadget::new(2)?;
        let leaf_hasher = PoseidonGadget::new(LEAF_INPUTS)?;

        // The slot was empty under the previous root
        let previous = Self::walk(&pair_hasher, FpVar::zero(), &levels)?;
        previous.enforce_equal(&previous_root)?;

        // The record's leaf in that slot yields the new root
        let leaf = leaf_hasher.hash(&[token_id_hi, token_id_lo, from, to, block_number.clone()])?;
        let derived = Self::walk(&pair_hasher, leaf, &levels)?;
        derived.enforce_equal(&new_root)?;

        // Block progression
        Self::enforce_progression(cs, self.shape.progression, &previous_block_number, &block_number)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_relations::r1cs::ConstraintSystem;
    use merkle::merkle_proof::MerklePath;
    use merkle::merkle_tree::MerkleTree;
    use state::transaction::{token_id_from_u64, TransactionRecord};

    const DEPTH: usize = 4;

    fn record(token_id: u64, block_number: u64) -> TransactionRecord {
        TransactionRecord::new(token_id_from_u64(token_id), [0x10; 20], [0x20; 20], block_number, token_id)
    }

    // Builds the witness for appending the `n`th record (blocks 100, 101, ...).
    fn witness_for(n: u64) -> StateTransitionWitness {
        let mut tree = MerkleTree::new();
        for i in 0..n {
            tree.append_record(&record(i, 100 + i)).unwrap();
        }
        let next = record(n, 100 + n);
        let insertion = tree.append_record(&next).unwrap();
        let previous_block = if n == 0 { 100 } else { 100 + n - 1 };
        StateTransitionWitness::new(&next, &insertion, previous_block)
    }

    fn is_satisfied(shape: CircuitShape, witness: StateTransitionWitness) -> bool {
        let cs = ConstraintSystem::<Fr>::new_ref();
        StateTransitionCircuit::new(shape, witness).generate_constraints(cs.clone()).unwrap();
        cs.is_satisfied().unwrap()
    }

    fn shape() -> CircuitShape {
        CircuitShape::new(DEPTH, BlockProgression::NonDecreasing)
    }

    #[test]
    fn honest_appends_satisfy_every_depth() {
        for n in 0..9 {
            assert!(is_satisfied(shape(), witness_for(n)), "append of leaf {} rejected", n);
        }
    }

    #[test]
    fn tampered_recipient_is_rejected() {
        let mut witness = witness_for(2);
        witness.to = [0x21; 20];
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn tampered_token_id_is_rejected() {
        let mut witness = witness_for(3);
        witness.token_id = token_id_from_u64(77);
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn wrong_previous_root_is_rejected() {
        let mut witness = witness_for(3);
        witness.previous_root = witness_for(2).new_root + Fr::from(1u64);
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn new_root_not_derived_from_path_is_rejected() {
        let mut witness = witness_for(4);
        witness.new_root = witness_for(5).new_root;
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn tampered_sibling_is_rejected() {
        let mut witness = witness_for(3);
        witness.merkle_path.sibling_hashes[0].0 += Fr::from(1u64);
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn path_not_leading_to_indexed_slot_is_rejected() {
        // A single right step from the previous root passes the empty-slot walk for any tree,
        // but it is the path of leaf 1, not leaf 3.
        let mut tree = MerkleTree::new();
        for i in 0..3 {
            tree.append_record(&record(i, 100 + i)).unwrap();
        }
        let next = record(3, 103);
        let leaf = merkle::hash::leaf_hash(&next).unwrap();
        let honest = tree.preview_append(leaf).unwrap();

        let forged_path = MerklePath::new(vec![(tree.root(), true)]);
        let mut forged = StateTransitionWitness::new(&next, &honest, 102);
        forged.new_root = forged_path.compute_root(leaf).unwrap();
        forged.merkle_path = forged_path;
        assert_eq!(forged.new_root, merkle::hash::hash_pair(tree.root(), leaf).unwrap());
        assert_ne!(forged.new_root, honest.new_root);
        assert_eq!(forged.leaf_index, 3);
        assert!(!is_satisfied(shape(), forged.clone()));

        // With the index the path does encode, the proof only matches a verifier holding one leaf.
        forged.leaf_index = 1;
        assert!(is_satisfied(shape(), forged.clone()));
        assert_ne!(forged.public_inputs()[8], Fr::from(tree.len() as u64));
    }

    #[test]
    fn leaf_index_must_match_direction_bits() {
        let mut witness = witness_for(3);
        witness.leaf_index = 2;
        assert!(!is_satisfied(shape(), witness));

        let mut witness = witness_for(5);
        witness.leaf_index = 5 + (1 << DEPTH);
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn nonempty_right_sibling_is_rejected() {
        let mut witness = witness_for(4);
        witness.merkle_path.sibling_hashes[0].0 = Fr::from(9u64);
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn extra_active_levels_are_rejected() {
        let mut witness = witness_for(2);
        witness.merkle_path.sibling_hashes.push((Fr::from(5u64), false));
        assert!(!is_satisfied(shape(), witness));
    }

    #[test]
    fn empty_sibling_on_active_level_passes_through() {
        // Leaf 4 of 5 has empty right siblings on its two lowest levels.
        let witness = witness_for(4);
        assert_eq!(witness.merkle_path.sibling_hashes[0], (Fr::from(0u64), false));
        assert_eq!(witness.merkle_path.sibling_hashes[1], (Fr::from(0u64), false));
        assert!(is_satisfied(shape(), witness));
    }

    #[test]
    fn progression_policies() {
        let mut same_block = witness_for(2);
        same_block.previous_block_number = same_block.block_number;
        let mut skipped = witness_for(2);
        skipped.previous_block_number = skipped.block_number - 5;
        let mut backwards = witness_for(2);
        backwards.previous_block_number = backwards.block_number + 1;
        let next = witness_for(2);

        let non_decreasing = CircuitShape::new(DEPTH, BlockProgression::NonDecreasing);
        assert!(is_satisfied(non_decreasing, same_block.clone()));
        assert!(is_satisfied(non_decreasing, skipped.clone()));
        assert!(!is_satisfied(non_decreasing, backwards.clone()));

        let strict = CircuitShape::new(DEPTH, BlockProgression::StrictlyIncreasing);
        assert!(!is_satisfied(strict, same_block.clone()));
        assert!(is_satisfied(strict, skipped.clone()));
        assert!(!is_satisfied(strict, backwards.clone()));

        let consecutive = CircuitShape::new(DEPTH, BlockProgression::Consecutive);
        assert!(is_satisfied(consecutive, next));
        assert!(!is_satisfied(consecutive, same_block));
        assert!(!is_satisfied(consecutive, skipped));
        assert!(!is_satisfied(consecutive, backwards));
    }

    #[test]
    fn path_deeper_than_circuit_fails_synthesis() {
        let witness = witness_for(20);
        let cs = ConstraintSystem::<Fr>::new_ref();
        let result = StateTransitionCircuit::new(shape(), witness).generate_constraints(cs);
        assert!(result.is_err());
    }
}
