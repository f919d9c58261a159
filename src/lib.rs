//! StreamGrab - HLS resolution and reassembly engine
//!
//! Turns a captured playlist URL into a single playable buffer: master playlists are
//! resolved to one variant, segments are fetched in order, AES-128 segments are decrypted,
//! and everything is concatenated behind the optional init segment.

pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    config::{DecryptFailurePolicy, EngineConfig},
    encryption::EncryptionContext,
    error_handling::{EngineError, EngineResult, ErrorCategory},
    fetcher::{FetchResponse, Fetcher, HttpFetcher, PlaylistFetcher},
    models::{
        ContainerKind, DownloadJob, DownloadReport, JobId, JobStatus, MasterPlaylist, MediaKind,
        MediaPlaylist, Playlist, ReassembledMedia, SegmentCount,
    },
    orchestrator::ResolutionOrchestrator,
    segment_pipeline::SegmentPipeline,
    variant_selector::VariantSelector,
};

pub use parsers::parse_playlist;
pub use utils::network::RequestContext;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the library with default settings
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing();

    tracing::info!("📚 {} v{} initialized", NAME, VERSION);
    Ok(())
}
