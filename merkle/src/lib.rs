pub mod hash;
pub mod merkle_proof;
pub mod merkle_tree;
