//! Engine error taxonomy
//!
//! Every failure the engine can surface is a variant of [`EngineError`]. Playlist-level and
//! key-level failures abort a job; per-segment failures are absorbed by the segment pipeline
//! and only show up in aggregate (see [`crate::core::models::DownloadReport`]).
//!
//! Callers that need to tell "login required" apart from "malformed source" and "network
//! failure" should match on [`EngineError::category`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::JobId;

/// Coarse classification used by callers to decide what to show the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The origin answered with a login page or an auth status
    Authentication,
    /// The playlist was empty, malformed, or formed a cycle
    Parsing,
    /// Transport failures, non-success HTTP statuses, missing segments
    Network,
    /// Key retrieval or segment decryption problems
    Decryption,
    /// Invalid engine configuration
    Configuration,
    /// Registry lookups against unknown jobs
    Job,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Login required: {url} returned {detail} instead of a playlist")]
    Auth { url: String, detail: String },

    #[error("Unrecognized playlist {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("Failed to fetch decryption key from {url}: {reason}")]
    KeyFetch { url: String, reason: String },

    #[error("Unsupported encryption method: {method}")]
    UnsupportedEncryption { method: String },

    #[error("Failed to decrypt segment #{index}: {reason}")]
    Decrypt { index: usize, reason: String },

    #[error("Failed to fetch segment #{index} ({url}): {reason}")]
    SegmentFetch {
        index: usize,
        url: String,
        reason: String,
    },

    #[error("No segments could be downloaded ({failed} of {total} failed)")]
    NoSegmentsDownloaded { total: usize, failed: usize },

    #[error("{failed} of {total} segments failed, above the configured limit of {limit}")]
    TooManySegmentFailures {
        total: usize,
        failed: usize,
        limit: usize,
    },

    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown download job: {0}")]
    UnknownJob(JobId),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth { .. } => ErrorCategory::Authentication,
            Self::Parse { .. } => ErrorCategory::Parsing,
            Self::KeyFetch { .. }
            | Self::UnsupportedEncryption { .. }
            | Self::Decrypt { .. } => ErrorCategory::Decryption,
            Self::SegmentFetch { .. }
            | Self::NoSegmentsDownloaded { .. }
            | Self::TooManySegmentFailures { .. }
            | Self::Http { .. }
            | Self::Network { .. } => ErrorCategory::Network,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::UnknownJob(_) => ErrorCategory::Job,
        }
    }

    /// True when the source sits behind a login wall
    pub fn requires_authentication(&self) -> bool {
        self.category() == ErrorCategory::Authentication
    }

    pub(crate) fn parse(url: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn network(url: &str, reason: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
