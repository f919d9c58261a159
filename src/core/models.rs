//! Core data models for the HLS engine

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a download job

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of media a captured URL points at

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Hls,

    Mp4,

    Webm,

    Video,
}

impl MediaKind {
    /// Classify a URL by the extension of its path (query and fragment ignored)
    pub fn from_url(url: &str) -> Self {
        let path = strip_query(url).to_ascii_lowercase();
        if path.ends_with(".m3u8") {
            Self::Hls
        } else if path.ends_with(".mp4") {
            Self::Mp4
        } else if path.ends_with(".webm") {
            Self::Webm
        } else {
            Self::Video
        }
    }

    pub fn is_hls(&self) -> bool {
        matches!(self, Self::Hls)
    }
}

/// Whether a URL looks like something worth capturing
pub fn is_video_url(url: &str) -> bool {
    !matches!(MediaKind::from_url(url), MediaKind::Video)
}

pub(crate) fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// One alternative rendition listed by a master playlist

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStream {
    pub url: String,

    pub codecs: Vec<String>,

    pub bandwidth: u64,

    pub resolution: Option<(u32, u32)>,

    /// `AUDIO` group id; its presence means the audio lives elsewhere (demuxed)
    pub audio_group: Option<String>,

    /// False for bare sub-playlist references without `#EXT-X-STREAM-INF`
    pub described: bool,
}

impl VariantStream {
    /// Audio and video travel together in this rendition
    pub fn is_muxed(&self) -> bool {
        self.audio_group.is_none()
    }

    pub fn has_h264(&self) -> bool {
        self.codecs.iter().any(|codec| {
            let codec = codec.trim().to_ascii_lowercase();
            codec.starts_with("avc1") || codec.starts_with("avc3")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterPlaylist {
    pub url: String,

    pub variants: Vec<VariantStream>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    pub url: String,
}

/// Segment-level encryption signalled by `#EXT-X-KEY`

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub method: String,

    pub key_url: String,

    /// 32 hex digits without the `0x` prefix
    pub iv_hex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    pub url: String,

    pub segments: Vec<SegmentRef>,

    pub encryption: Option<EncryptionInfo>,

    /// Fragmented-MP4 initialization segment (`#EXT-X-MAP`)
    pub init_segment_url: Option<String>,
}

impl MediaPlaylist {
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }
}

/// Result of parsing one playlist document

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Playlist {
    Master(MasterPlaylist),

    Media(MediaPlaylist),
}

/// Job lifecycle state

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Captured,

    Parsing,

    Ready,

    AuthError,

    ParseError,

    Downloading,

    Completed,

    Failed,
}

/// Number of segments known for a job

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentCount {
    Known(usize),

    /// Master playlist whose variant selection waits for download time
    Unresolved,
}

/// A captured video URL and everything learned about it so far

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: JobId,

    /// Opaque owner of the job, e.g. a browser tab
    pub context: String,

    pub source_url: String,

    pub initiator: Option<String>,

    pub kind: MediaKind,

    pub status: JobStatus,

    pub segments: Option<MediaPlaylist>,

    pub segment_count: SegmentCount,

    pub bytes_total: u64,

    pub bytes_downloaded: u64,

    pub failed_count: usize,

    pub error: Option<String>,

    pub captured_at: chrono::DateTime<chrono::Utc>,

    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl DownloadJob {
    pub fn new(context: impl Into<String>, source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let now = chrono::Utc::now();
        Self {
            id: JobId::new(),
            context: context.into(),
            kind: MediaKind::from_url(&source_url),
            source_url,
            initiator: None,
            status: JobStatus::Captured,
            segments: None,
            segment_count: SegmentCount::Known(0),
            bytes_total: 0,
            bytes_downloaded: 0,
            failed_count: 0,
            error: None,
            captured_at: now,
            updated_at: now,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.segments
            .as_ref()
            .map(MediaPlaylist::is_encrypted)
            .unwrap_or(false)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

/// Container type of the reassembled buffer

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    /// MPEG transport stream
    Mp2t,

    /// MP4, fragmented or progressive
    Mp4,
}

impl ContainerKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp2t => "video/mp2t",
            Self::Mp4 => "video/mp4",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp2t => "ts",
            Self::Mp4 => "mp4",
        }
    }

    /// fMP4 when an init segment exists, TS for other HLS, MP4 for direct sources
    pub fn infer(is_hls: bool, has_init_segment: bool) -> Self {
        if has_init_segment || !is_hls {
            Self::Mp4
        } else {
            Self::Mp2t
        }
    }
}

/// Aggregate outcome of one segment pipeline run

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReport {
    pub segments_total: usize,

    pub segments_downloaded: usize,

    pub failed_count: usize,

    /// Segments kept as ciphertext after a decryption error
    pub decrypt_failures: usize,

    pub init_segment_included: bool,

    pub bytes_assembled: u64,
}

/// Final deliverable handed back to the caller

#[derive(Debug, Clone)]
pub struct ReassembledMedia {
    pub bytes: Bytes,

    pub container: ContainerKind,

    pub report: DownloadReport,
}

impl ReassembledMedia {
    pub fn mime_hint(&self) -> &'static str {
        self.container.mime_type()
    }
}
