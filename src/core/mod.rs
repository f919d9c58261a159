//! Core engine module
//!
//! This module contains the domain models, the fetch seam, encryption, the segment
//! pipeline and the orchestrator that ties them together.

pub mod config;
pub mod encryption;
pub mod error_handling;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod segment_pipeline;
pub mod variant_selector;

#[cfg(test)]
mod hls_integration_tests;

// Re-export commonly used types
pub use config::{DecryptFailurePolicy, EngineConfig};
pub use error_handling::{EngineError, EngineResult, ErrorCategory};
pub use orchestrator::ResolutionOrchestrator;
