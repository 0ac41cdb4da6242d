pub mod broker;
pub mod core;
pub mod exchange;
pub mod persistence;
pub mod state_store;
