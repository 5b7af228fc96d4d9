use ark_bn254::Fr;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::fields::FieldVar;
use ark_relations::r1cs::SynthesisError;
use light_poseidon::parameters::bn254_x5::get_poseidon_parameters;
use light_poseidon::PoseidonParameters;

/// In-circuit Poseidon permutation with the same circom parameters as
/// [`light_poseidon::Poseidon::new_circom`], so gadget and native hashes agree.
pub struct PoseidonGadget {
    params: PoseidonParameters<Fr>,
}

impl PoseidonGadget {
    pub fn new(nr_inputs: usize) -> Result<Self, SynthesisError> {
        let width = u8::try_from(nr_inputs + 1).map_err(|_| SynthesisError::Unsatisfiable)?;
        let params = get_poseidon_parameters::<Fr>(width).map_err(|_| SynthesisError::Unsatisfiable)?;
        Ok(PoseidonGadget { params })
    }

    pub fn hash(&self, inputs: &[FpVar<Fr>]) -> Result<FpVar<Fr>, SynthesisError> {
        let width = self.params.width;
        if inputs.len() + 1 != width {
            return Err(SynthesisError::Unsatisfiable);
        }

        // Domain tag zero in the capacity element.
        let mut state: Vec<FpVar<Fr>> = Vec::with_capacity(width);
        state.push(FpVar::zero());
        state.extend(inputs.iter().cloned());

        let half_full = self.params.full_rounds / 2;
        let partial_end = half_full + self.params.partial_rounds;
        let all_rounds = self.params.full_rounds + self.params.partial_rounds;
        let alpha = [self.params.alpha];

        for round in 0..all_rounds {
            for (i, element) in state.iter_mut().enumerate() {
                *element += self.params.ark[round * width + i];
            }

            if round < half_full || round >= partial_end {
                for element in state.iter_mut() {
                    *element = element.pow_by_constant(alpha)?;
                }
            } else {
                state[0] = state[0].pow_by_constant(alpha)?;
            }

            state = self
                .params
                .mds
                .iter()
                .map(|row| {
                    row.iter()
                        .zip(state.iter())
                        .fold(FpVar::zero(), |acc, (coefficient, element)| acc + element * *coefficient)
                })
                .collect();
        }

        Ok(state.swap_remove(0))
    }
}
