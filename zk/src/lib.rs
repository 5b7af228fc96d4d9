pub mod byte_utils;
pub mod error;
pub mod poseidon_gadget;
pub mod prove;
pub mod state_transition_circuit;
pub mod verify;
pub mod witness;
