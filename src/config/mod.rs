//! Configuration constants for the storage engine.

pub mod constants;

pub use constants::*;
