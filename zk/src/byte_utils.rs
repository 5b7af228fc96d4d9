use crate::error::ZkError;
use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::PrimeField;
use ark_groth16::Proof;
use merkle::hash::field_to_be_bytes;

pub const WORD_LEN: usize = 32;
/// a (2 words), b (4 words), c (2 words).
pub const EVM_PROOF_LEN: usize = 8 * WORD_LEN;

// Rejects words that are not the canonical encoding of a field element.
pub fn bytes_to_field<F: PrimeField>(bytes: &[u8]) -> Result<F, ZkError> {
    if bytes.len() != WORD_LEN {
        return Err(ZkError::Encoding(format!("expected a {} byte word, got {}", WORD_LEN, bytes.len())));
    }
    let field = F::from_be_bytes_mod_order(bytes);
    if field_to_be_bytes(&field)[..] != bytes[..] {
        return Err(ZkError::Encoding("word is not a canonical field element".to_string()));
    }
    Ok(field)
}

pub fn public_inputs_to_bytes(inputs: &[Fr]) -> Vec<[u8; 32]> {
    inputs.iter().map(field_to_be_bytes).collect()
}

pub fn public_inputs_from_bytes(inputs: &[[u8; 32]]) -> Result<Vec<Fr>, ZkError> {
    inputs.iter().map(|word| bytes_to_field::<Fr>(word)).collect()
}

fn push_g1(out: &mut Vec<u8>, point: &G1Affine) {
    match point.xy() {
        Some((x, y)) => {
            out.extend_from_slice(&field_to_be_bytes(x));
            out.extend_from_slice(&field_to_be_bytes(y));
        }
        None => out.extend_from_slice(&[0u8; 2 * WORD_LEN]),
    }
}

// The EVM precompiles expect the imaginary coefficient first.
fn push_g2(out: &mut Vec<u8>, point: &G2Affine) {
    match point.xy() {
        Some((x, y)) => {
            out.extend_from_slice(&field_to_be_bytes(&x.c1));
            out.extend_from_slice(&field_to_be_bytes(&x.c0));
            out.extend_from_slice(&field_to_be_bytes(&y.c1));
            out.extend_from_slice(&field_to_be_bytes(&y.c0));
        }
        None => out.extend_from_slice(&[0u8; 4 * WORD_LEN]),
    }
}

fn read_g1(words: &[u8]) -> Result<G1Affine, ZkError> {
    let x: Fq = bytes_to_field(&words[..WORD_LEN])?;
    let y: Fq = bytes_to_field(&words[WORD_LEN..2 * WORD_LEN])?;
    if x == Fq::from(0u64) && y == Fq::from(0u64) {
        return Ok(G1Affine::zero());
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ZkError::Encoding("G1 point is not on the curve".to_string()));
    }
    Ok(point)
}

fn read_g2(words: &[u8]) -> Result<G2Affine, ZkError> {
    let x = Fq2::new(
        bytes_to_field(&words[WORD_LEN..2 * WORD_LEN])?,
        bytes_to_field(&words[..WORD_LEN])?,
    );
    let y = Fq2::new(
        bytes_to_field(&words[3 * WORD_LEN..4 * WORD_LEN])?,
        bytes_to_field(&words[2 * WORD_LEN..3 * WORD_LEN])?,
    );
    if x == Fq2::from(0u64) && y == Fq2::from(0u64) {
        return Ok(G2Affine::zero());
    }
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ZkError::Encoding("G2 point is not on the curve or not in the subgroup".to_string()));
    }
    Ok(point)
}

/// Encodes a proof as `a.x, a.y, b.x.c1, b.x.c0, b.y.c1, b.y.c0, c.x, c.y`, the layout Solidity
/// Groth16 verifiers take.
pub fn proof_to_evm_bytes(proof: &Proof<Bn254>) -> Vec<u8> {
    let mut out = Vec::with_capacity(EVM_PROOF_LEN);
    push_g1(&mut out, &proof.a);
    push_g2(&mut out, &proof.b);
    push_g1(&mut out, &proof.c);
    out
}

pub fn proof_from_evm_bytes(bytes: &[u8]) -> Result<Proof<Bn254>, ZkError> {
    if bytes.len() != EVM_PROOF_LEN {
        return Err(ZkError::Encoding(format!("expected {} proof bytes, got {}", EVM_PROOF_LEN, bytes.len())));
    }
    Ok(Proof {
        a: read_g1(&bytes[..2 * WORD_LEN])?,
        b: read_g2(&bytes[2 * WORD_LEN..6 * WORD_LEN])?,
        c: read_g1(&bytes[6 * WORD_LEN..])?,
    })
}
