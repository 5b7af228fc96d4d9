pub mod accumulator;
pub mod error;
pub mod oracle_coordinator;
