pub mod errors;
pub mod filters;
pub mod keys;
pub mod ports;
pub mod regime;
pub mod types;
