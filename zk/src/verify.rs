use crate::byte_utils::{proof_from_evm_bytes, public_inputs_from_bytes};
use crate::error::ZkError;
use crate::prove::ProofPackage;
use crate::witness::PUBLIC_INPUTS;
use ark_bn254::Bn254;
use ark_groth16::{Groth16, PreparedVerifyingKey};
use ark_snark::SNARK;

/// Checks a package the same way the destination verifier would.
pub fn verify_package(
    prepared_verifying_key: &PreparedVerifyingKey<Bn254>,
    package: &ProofPackage,
) -> Result<bool, ZkError> {
    if package.public_inputs.len() != PUBLIC_INPUTS {
        return Err(ZkError::Encoding(format!(
            "expected {} public inputs, got {}",
            PUBLIC_INPUTS,
            package.public_inputs.len()
        )));
    }
    let proof = proof_from_evm_bytes(&package.proof)?;
    let public_inputs = public_inputs_from_bytes(&package.public_inputs)?;
    Groth16::<Bn254>::verify_with_processed_vk(prepared_verifying_key, &public_inputs, &proof).map_err(ZkError::proving)
}
