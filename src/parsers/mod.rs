//! Playlist parsing modules
//!
//! Contains the M3U8 parser used to turn fetched playlist text into typed playlists.

pub mod m3u8_parser;

// Re-export commonly used parsers
pub use m3u8_parser::*;
