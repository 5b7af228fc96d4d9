pub mod config;
pub mod progression;
pub mod state_record;
pub mod transaction;
