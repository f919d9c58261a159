//! Utility modules and helper functions
//!
//! This module contains shared utilities and helper functions used across the engine.

pub mod logging;
pub mod network;

// Re-export commonly used utilities
pub use logging::*;
pub use network::*;
