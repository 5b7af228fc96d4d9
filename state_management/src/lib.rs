pub mod sled_state_management;
pub mod state_management;
