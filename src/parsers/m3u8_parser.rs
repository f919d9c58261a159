//! M3U8 playlist parsing utilities
//!
//! Classification is line based: a non-comment line whose path does not end in `.m3u8` is a
//! segment, one that does is a sub-playlist reference. Any segment line makes the document a
//! media playlist, so a media playlist that also points at a separate audio playlist is never
//! mistaken for a master.

use std::collections::HashMap;
use url::Url;

use crate::core::error_handling::{EngineError, EngineResult};
use crate::core::models::{
    strip_query, EncryptionInfo, MasterPlaylist, MediaPlaylist, Playlist, SegmentRef,
    VariantStream,
};
use crate::utils::network::is_html_document;

const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF";
const TAG_KEY: &str = "#EXT-X-KEY";
const TAG_MAP: &str = "#EXT-X-MAP";

/// Outcome of reading one `#EXT-X-KEY` tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyTag {
    /// `METHOD=NONE`: segments that follow are clear
    Clear,
    Encrypted(EncryptionInfo),
}

/// Parse playlist content fetched from `playlist_url`
pub fn parse_playlist(content: &str, playlist_url: &str) -> EngineResult<Playlist> {
    if is_html_document(content) {
        return Err(EngineError::Auth {
            url: playlist_url.to_string(),
            detail: "an HTML page".to_string(),
        });
    }

    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let uri_lines = lines
        .iter()
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let mut segment_lines = 0usize;
    let mut playlist_lines = 0usize;
    for line in uri_lines {
        if is_playlist_reference(line) {
            playlist_lines += 1;
        } else {
            segment_lines += 1;
        }
    }

    if segment_lines > 0 {
        tracing::debug!(
            "Media playlist {}: {} segment lines ({} sub-playlist references ignored)",
            playlist_url,
            segment_lines,
            playlist_lines
        );
        Ok(Playlist::Media(parse_media(&lines, playlist_url)))
    } else if playlist_lines > 0 {
        tracing::debug!(
            "Master playlist {}: {} sub-playlists",
            playlist_url,
            playlist_lines
        );
        Ok(Playlist::Master(parse_master(&lines, playlist_url)))
    } else {
        Err(EngineError::parse(
            playlist_url,
            "no segments or sub-playlists found",
        ))
    }
}

fn parse_master(lines: &[&str], playlist_url: &str) -> MasterPlaylist {
    let mut variants = Vec::new();
    let mut pending: Option<HashMap<String, String>> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(TAG_STREAM_INF) {
            pending = Some(parse_attribute_list(tag_value(line)));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let url = resolve_url(playlist_url, line);
        let variant = match pending.take() {
            Some(attrs) => variant_from_attributes(url, &attrs),
            None => VariantStream {
                url,
                codecs: Vec::new(),
                bandwidth: 0,
                resolution: None,
                audio_group: None,
                described: false,
            },
        };
        variants.push(variant);
    }

    MasterPlaylist {
        url: playlist_url.to_string(),
        variants,
    }
}

fn variant_from_attributes(url: String, attrs: &HashMap<String, String>) -> VariantStream {
    let codecs = attrs
        .get("CODECS")
        .map(|codecs| {
            codecs
                .split(',')
                .map(str::trim)
                .filter(|codec| !codec.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let bandwidth = attrs
        .get("BANDWIDTH")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);

    let resolution = attrs.get("RESOLUTION").and_then(|value| {
        let (width, height) = value.split_once(['x', 'X'])?;
        Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
    });

    VariantStream {
        url,
        codecs,
        bandwidth,
        resolution,
        audio_group: attrs.get("AUDIO").cloned(),
        described: true,
    }
}

fn parse_media(lines: &[&str], playlist_url: &str) -> MediaPlaylist {
    let mut segments = Vec::new();
    let mut encryption = None;
    let mut init_segment_url = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(TAG_KEY) {
            match parse_encryption_line(line, playlist_url) {
                Some(KeyTag::Clear) => encryption = None,
                Some(KeyTag::Encrypted(info)) => {
                    if is_key_rotation(encryption.as_ref(), &info) {
                        tracing::warn!(
                            "Key rotation in {}: {} replaces {} for every segment",
                            playlist_url,
                            info.key_url,
                            encryption.as_ref().map(|k| k.key_url.as_str()).unwrap_or("")
                        );
                    }
                    tracing::debug!(
                        "Found encryption: method={}, key={}, iv={}",
                        info.method,
                        info.key_url,
                        if info.iv_hex.is_some() { "explicit" } else { "derived" }
                    );
                    encryption = Some(info);
                }
                None => tracing::warn!("Ignoring #EXT-X-KEY without a key URI: {}", line),
            }
        } else if line.starts_with(TAG_MAP) {
            if init_segment_url.is_some() {
                continue;
            }
            match parse_attribute_list(tag_value(line)).get("URI") {
                Some(uri) => init_segment_url = Some(resolve_url(playlist_url, uri)),
                None => tracing::warn!("Ignoring #EXT-X-MAP without URI: {}", line),
            }
        } else if !line.starts_with('#') && !is_playlist_reference(line) {
            segments.push(SegmentRef {
                url: resolve_url(playlist_url, line),
            });
        }
    }

    MediaPlaylist {
        url: playlist_url.to_string(),
        segments,
        encryption,
        init_segment_url,
    }
}

/// Parse one `#EXT-X-KEY` line; `None` when the tag names no usable key
pub fn parse_encryption_line(line: &str, playlist_url: &str) -> Option<KeyTag> {
    let attrs = parse_attribute_list(tag_value(line));
    let method = attrs
        .get("METHOD")
        .map(|method| method.to_ascii_uppercase())
        .unwrap_or_default();

    if method == "NONE" {
        return Some(KeyTag::Clear);
    }

    let key_url = resolve_url(playlist_url, attrs.get("URI")?);
    let iv_hex = attrs.get("IV").and_then(|iv| {
        let parsed = normalize_iv(iv);
        if parsed.is_none() {
            tracing::warn!("IV {:?} is not 16 bytes of hex, deriving IVs instead", iv);
        }
        parsed
    });

    Some(KeyTag::Encrypted(EncryptionInfo {
        method,
        key_url,
        iv_hex,
    }))
}

/// A second, different key; only one key is applied per playlist
fn is_key_rotation(current: Option<&EncryptionInfo>, next: &EncryptionInfo) -> bool {
    current.map(|current| current != next).unwrap_or(false)
}

/// `0x`-prefixed IV to 32 lowercase hex digits
fn normalize_iv(iv: &str) -> Option<String> {
    let digits = iv
        .trim()
        .strip_prefix("0x")
        .or_else(|| iv.trim().strip_prefix("0X"))
        .unwrap_or(iv.trim());
    if digits.len() == 32 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(digits.to_ascii_lowercase())
    } else {
        None
    }
}

/// True for URI lines that point at another playlist
pub fn is_playlist_reference(line: &str) -> bool {
    strip_query(line).to_ascii_lowercase().ends_with(".m3u8")
}

fn tag_value(line: &str) -> &str {
    line.split_once(':').map(|(_, value)| value).unwrap_or("")
}

/// Parse an attribute list such as `BANDWIDTH=1280000,CODECS="avc1.4d401f,mp4a.40.2"`
pub fn parse_attribute_list(input: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let name = rest[..eq].trim().to_ascii_uppercase();
        rest = &rest[eq + 1..];

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = &quoted[..end];
            let after = quoted.get(end + 1..).unwrap_or("");
            rest = after.split_once(',').map(|(_, next)| next).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = &rest[..end];
            rest = rest.get(end + 1..).unwrap_or("");
        }

        if !name.is_empty() {
            attrs.insert(name, value.trim().to_string());
        }
    }

    attrs
}

/// Directory component of a URL, up to and including the last `/` of its path
pub fn base_url(playlist_url: &str) -> &str {
    let path = strip_query(playlist_url);
    match path.rfind('/') {
        Some(pos) => &playlist_url[..=pos],
        None => playlist_url,
    }
}

/// Resolve a URI found in a playlist against the playlist's own URL
pub fn resolve_url(playlist_url: &str, reference: &str) -> String {
    let relative = match Url::parse(reference) {
        Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => {
            return reference.to_string();
        }
        // `seg:0001.ts` parses with a `seg` scheme but is a file name
        Ok(_) => format!("./{}", reference),
        Err(_) => reference.to_string(),
    };

    match Url::parse(playlist_url).and_then(|base| base.join(&relative)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => format!("{}{}", base_url(playlist_url), reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(playlist: Playlist) -> MediaPlaylist {
        match playlist {
            Playlist::Media(media) => media,
            Playlist::Master(master) => panic!("expected media playlist, got {:?}", master),
        }
    }

    fn master(playlist: Playlist) -> MasterPlaylist {
        match playlist {
            Playlist::Master(master) => master,
            Playlist::Media(media) => panic!("expected master playlist, got {:?}", media),
        }
    }

    #[test]
    fn test_media_playlist_parsing() {
        let content = r#"#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:9.009,
http://example.com/segment000.ts
#EXTINF:9.009,
segment001.ts
#EXTINF:3.003,
/abs/segment002.ts
#EXT-X-ENDLIST"#;

        let playlist =
            media(parse_playlist(content, "http://example.com/videos/playlist.m3u8").unwrap());

        let urls: Vec<&str> = playlist.segments.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://example.com/segment000.ts",
                "http://example.com/videos/segment001.ts",
                "http://example.com/abs/segment002.ts",
            ]
        );
        assert!(playlist.encryption.is_none());
        assert!(playlist.init_segment_url.is_none());
    }

    #[test]
    fn test_media_playlist_with_audio_reference_stays_media() {
        let content = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"a\"\naudio/index.m3u8\n#EXTINF:4,\nv/seg0.ts\n#EXTINF:4,\nv/seg1.ts\n";

        let playlist = media(parse_playlist(content, "https://cdn.example.com/hls/index.m3u8").unwrap());

        assert_eq!(playlist.segments.len(), 2);
        assert!(playlist
            .segments
            .iter()
            .all(|segment| segment.url.ends_with(".ts")));
    }

    #[test]
    fn test_master_playlist_parsing() {
        let content = r#"#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080,CODECS="avc1.640028,mp4a.40.2"
1080p/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=8000000,CODECS="avc1.640033",AUDIO="grp1"
# a comment between tag and URI
video-only.m3u8?token=abc
"#;

        let playlist = master(parse_playlist(content, "https://example.com/live/master.m3u8").unwrap());

        assert_eq!(playlist.variants.len(), 2);
        let first = &playlist.variants[0];
        assert_eq!(first.url, "https://example.com/live/1080p/index.m3u8");
        assert_eq!(first.bandwidth, 5_000_000);
        assert_eq!(first.resolution, Some((1920, 1080)));
        assert_eq!(first.codecs, vec!["avc1.640028", "mp4a.40.2"]);
        assert!(first.is_muxed());
        assert!(first.described);

        let second = &playlist.variants[1];
        assert_eq!(second.url, "https://example.com/live/video-only.m3u8?token=abc");
        assert_eq!(second.audio_group.as_deref(), Some("grp1"));
        assert_eq!(second.resolution, None);
        assert!(!second.is_muxed());
    }

    #[test]
    fn test_bare_master_playlist() {
        let content = "#EXTM3U\nlow.m3u8\nhigh.m3u8\n";
        let playlist = master(parse_playlist(content, "https://example.com/master.m3u8").unwrap());

        assert_eq!(playlist.variants.len(), 2);
        assert!(playlist.variants.iter().all(|variant| !variant.described));
    }

    #[test]
    fn test_html_response_is_auth_error() {
        let err = parse_playlist(
            "<!DOCTYPE html>\n<html><body>Please sign in</body></html>",
            "https://example.com/master.m3u8",
        )
        .unwrap_err();
        assert!(err.requires_authentication());

        let err = parse_playlist("<html><body>login</body></html>", "https://example.com/a.m3u8")
            .unwrap_err();
        assert!(matches!(err, EngineError::Auth { .. }));
    }

    #[test]
    fn test_empty_playlist_is_parse_error() {
        let err = parse_playlist("#EXTM3U\n#EXT-X-ENDLIST\n", "https://example.com/a.m3u8")
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse { .. }));

        let err = parse_playlist("", "https://example.com/a.m3u8").unwrap_err();
        assert!(matches!(err, EngineError::Parse { .. }));
    }

    #[test]
    fn test_encryption_parsing() {
        let line = r#"#EXT-X-KEY:METHOD=AES-128,URI="https://example.com/key.bin",IV=0X99b74007b6254e4bd1c6e03631cad15b"#;

        let Some(KeyTag::Encrypted(info)) =
            parse_encryption_line(line, "https://example.com/index.m3u8")
        else {
            panic!("expected an encryption key");
        };
        assert_eq!(info.method, "AES-128");
        assert_eq!(info.key_url, "https://example.com/key.bin");
        assert_eq!(
            info.iv_hex.as_deref(),
            Some("99b74007b6254e4bd1c6e03631cad15b")
        );
    }

    #[test]
    fn test_encryption_variants() {
        let base = "https://example.com/hls/index.m3u8";

        assert_eq!(
            parse_encryption_line("#EXT-X-KEY:METHOD=NONE", base),
            Some(KeyTag::Clear)
        );
        assert_eq!(parse_encryption_line("#EXT-X-KEY:METHOD=AES-128", base), None);

        let Some(KeyTag::Encrypted(relative)) =
            parse_encryption_line(r#"#EXT-X-KEY:METHOD=AES-128,URI="keys/k1.bin""#, base)
        else {
            panic!("expected an encryption key");
        };
        assert_eq!(relative.key_url, "https://example.com/hls/keys/k1.bin");
        assert_eq!(relative.iv_hex, None);

        let Some(KeyTag::Encrypted(short_iv)) =
            parse_encryption_line(r#"#EXT-X-KEY:METHOD=AES-128,URI="k",IV=0x1234"#, base)
        else {
            panic!("expected an encryption key");
        };
        assert_eq!(short_iv.iv_hex, None);
    }

    #[test]
    fn test_media_playlist_key_and_map() {
        let content = r#"#EXTM3U
#EXT-X-MAP:URI="init.mp4"
#EXT-X-KEY:METHOD=AES-128,URI="key1.bin"
#EXTINF:6,
seg0.m4s
#EXT-X-KEY:METHOD=AES-128,URI="key2.bin",IV=0x00000000000000000000000000000001
#EXTINF:6,
seg1.m4s
"#;

        let playlist = media(parse_playlist(content, "https://example.com/v/index.m3u8").unwrap());

        assert_eq!(
            playlist.init_segment_url.as_deref(),
            Some("https://example.com/v/init.mp4")
        );
        let encryption = playlist.encryption.unwrap();
        assert_eq!(encryption.key_url, "https://example.com/v/key2.bin");
        assert_eq!(
            encryption.iv_hex.as_deref(),
            Some("00000000000000000000000000000001")
        );
        assert_eq!(playlist.segments.len(), 2);
    }

    #[test]
    fn test_key_rotation_detection() {
        let key = |url: &str| EncryptionInfo {
            method: "AES-128".to_string(),
            key_url: url.to_string(),
            iv_hex: None,
        };

        assert!(!is_key_rotation(None, &key("k1")));
        assert!(!is_key_rotation(Some(&key("k1")), &key("k1")));
        assert!(is_key_rotation(Some(&key("k1")), &key("k2")));
    }

    #[test]
    fn test_method_none_clears_encryption() {
        let content = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"k.bin\"\n#EXT-X-KEY:METHOD=NONE\nseg0.ts\n";
        let playlist = media(parse_playlist(content, "https://example.com/index.m3u8").unwrap());
        assert!(playlist.encryption.is_none());
    }

    #[test]
    fn test_attribute_list_parsing() {
        let attrs = parse_attribute_list(
            r#"BANDWIDTH=1280000,CODECS="avc1.4d401f,mp4a.40.2",RESOLUTION=640x360,AUDIO="aac""#,
        );
        assert_eq!(attrs.get("BANDWIDTH").map(String::as_str), Some("1280000"));
        assert_eq!(
            attrs.get("CODECS").map(String::as_str),
            Some("avc1.4d401f,mp4a.40.2")
        );
        assert_eq!(attrs.get("RESOLUTION").map(String::as_str), Some("640x360"));
        assert_eq!(attrs.get("AUDIO").map(String::as_str), Some("aac"));
    }

    #[test]
    fn test_relative_url_resolution() {
        assert_eq!(
            resolve_url("https://example.com/videos/index.m3u8?sig=1", "segment000.ts"),
            "https://example.com/videos/segment000.ts"
        );
        assert_eq!(
            resolve_url("https://example.com/videos/index.m3u8", "https://cdn.example.com/a.ts"),
            "https://cdn.example.com/a.ts"
        );
        assert_eq!(
            resolve_url("https://example.com/v/index.m3u8", "seg:0001.ts"),
            "https://example.com/v/seg:0001.ts"
        );
        assert_eq!(
            resolve_url("https://example.com/v/index.m3u8", "//cdn.example.com/a.ts"),
            "https://cdn.example.com/a.ts"
        );
        assert_eq!(
            base_url("https://example.com/videos/index.m3u8?path=a/b"),
            "https://example.com/videos/"
        );
    }

    #[test]
    fn test_playlist_reference_detection() {
        assert!(is_playlist_reference("720p/index.m3u8"));
        assert!(is_playlist_reference("720p/INDEX.M3U8?token=a.ts"));
        assert!(!is_playlist_reference("seg0.ts"));
        assert!(!is_playlist_reference("seg0.ts?src=a.m3u8"));
    }
}
