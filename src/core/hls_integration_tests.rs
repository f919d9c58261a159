//! End-to-end engine tests
//!
//! Exercise the whole chain against an in-memory origin:
//! - master → variant → media resolution
//! - AES-128 keys with derived and explicit IVs
//! - init segments and container inference
//! - login walls and partial downloads

#[cfg(test)]
mod tests {
    use super::super::config::EngineConfig;
    use super::super::encryption::{derive_iv, encrypt_for_test, parse_iv};
    use super::super::error_handling::{EngineError, ErrorCategory};
    use super::super::fetcher::testing::MemoryFetcher;
    use super::super::models::{ContainerKind, JobStatus, SegmentCount};
    use super::super::orchestrator::ResolutionOrchestrator;
    use crate::utils::network::RequestContext;
    use std::sync::Arc;
    use tempfile::tempdir;

    const ORIGIN: &str = "https://media.example.com/vod/";
    const KEY: [u8; 16] = *b"sixteen byte key";

    fn url(path: &str) -> String {
        format!("{}{}", ORIGIN, path)
    }

    fn engine(memory: Arc<MemoryFetcher>) -> ResolutionOrchestrator {
        let config = EngineConfig {
            yield_delay_ms: 0,
            ..EngineConfig::default()
        };
        ResolutionOrchestrator::new(config, memory)
    }

    fn payload(i: usize) -> Vec<u8> {
        format!("segment-{:03}|", i).into_bytes().repeat(40)
    }

    /// Master with a demuxed high-bitrate variant and a muxed H.264 one
    fn serve_master(memory: &MemoryFetcher) {
        memory.route(
            &url("master.m3u8"),
            "#EXTM3U\n\
             #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"grp1\",NAME=\"en\",URI=\"audio/en.m3u8\"\n\
             #EXT-X-STREAM-INF:BANDWIDTH=5000000,CODECS=\"avc1.640028,mp4a.40.2\",RESOLUTION=1280x720\n\
             muxed/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=8000000,CODECS=\"avc1.640028\",AUDIO=\"grp1\",RESOLUTION=1920x1080\n\
             video/index.m3u8\n",
        );
    }

    #[tokio::test]
    async fn test_encrypted_master_to_file() {
        let memory = Arc::new(MemoryFetcher::new());
        serve_master(&memory);

        let mut playlist = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n\
             #EXT-X-KEY:METHOD=AES-128,URI=\"../keys/k1.bin\"\n",
        );
        for i in 0..15 {
            playlist.push_str(&format!("#EXTINF:4.0,\nseg{}.ts?token=xyz\n", i));
            memory.route(
                &url(&format!("muxed/seg{}.ts?token=xyz", i)),
                encrypt_for_test(&KEY, &derive_iv(i), &payload(i)),
            );
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        memory.route(&url("muxed/index.m3u8"), playlist);
        memory.route(&url("keys/k1.bin"), KEY.to_vec());

        let engine = engine(memory.clone());
        let id = engine
            .capture("tab-7", &url("master.m3u8"), None, RequestContext::new())
            .await;
        assert_eq!(
            engine.job(id).await.unwrap().segment_count,
            SegmentCount::Unresolved
        );

        let media = engine.download(id, |_, _| {}).await.unwrap();
        let expected: Vec<u8> = (0..15).flat_map(payload).collect();
        assert_eq!(media.bytes.as_ref(), expected.as_slice());
        assert_eq!(media.container, ContainerKind::Mp2t);
        assert_eq!(memory.request_count(&url("keys/k1.bin")), 1);
        assert_eq!(memory.request_count(&url("video/index.m3u8")), 0);

        let job = engine.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.is_encrypted());

        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join(format!("capture.{}", media.container.extension()));
        tokio::fs::write(&path, &media.bytes).await.unwrap();
        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written.len(), expected.len());
        assert!(path.to_string_lossy().ends_with(".ts"));

        println!("✅ Encrypted master playlist reassembled");
    }

    #[tokio::test]
    async fn test_fmp4_with_explicit_iv() {
        let memory = Arc::new(MemoryFetcher::new());
        let iv_hex = "0x1f2e3d4c5b6a79880102030405060708";
        let iv = parse_iv(iv_hex).unwrap();

        memory.route(
            &url("fmp4/index.m3u8"),
            format!(
                "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n\
                 #EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k\",IV={}\n\
                 #EXTINF:2,\n0.m4s\n#EXTINF:2,\n1.m4s\n",
                iv_hex
            ),
        );
        memory.route("https://keys.example.com/k", KEY.to_vec());
        memory.route(&url("fmp4/init.mp4"), b"ftypiso6moov".to_vec());
        memory.route(&url("fmp4/0.m4s"), encrypt_for_test(&KEY, &iv, b"moof0mdat0"));
        memory.route(&url("fmp4/1.m4s"), encrypt_for_test(&KEY, &iv, b"moof1mdat1"));

        let media = engine(memory)
            .fetch_media(&url("fmp4/index.m3u8"), RequestContext::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(media.bytes.as_ref(), b"ftypiso6moovmoof0mdat0moof1mdat1");
        assert_eq!(media.mime_hint(), "video/mp4");
        assert!(media.report.init_segment_included);
    }

    #[tokio::test]
    async fn test_login_wall_yields_auth_error_and_no_segments() {
        let memory = Arc::new(MemoryFetcher::new());
        memory.route(
            &url("private/index.m3u8"),
            "\u{feff}  <!DOCTYPE html>\n<html><head><title>Log in</title></head></html>",
        );
        let engine = engine(memory.clone());

        let err = engine
            .fetch_media(&url("private/index.m3u8"), RequestContext::new(), |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert_eq!(memory.requested_urls().len(), 1);

        let id = engine
            .capture("tab-1", &url("private/index.m3u8"), None, RequestContext::new())
            .await;
        let job = engine.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::AuthError);
        assert!(job.segments.is_none());
    }

    #[tokio::test]
    async fn test_missing_middle_segment() {
        let memory = Arc::new(MemoryFetcher::new());
        memory.route(&url("gap/index.m3u8"), "#EXTM3U\nseg1.ts\nseg2.ts\nseg3.ts\n");
        memory.route(&url("gap/seg1.ts"), b"seg1".to_vec());
        memory.route_status(&url("gap/seg2.ts"), 404);
        memory.route(&url("gap/seg3.ts"), b"seg3".to_vec());

        let media = engine(memory)
            .fetch_media(&url("gap/index.m3u8"), RequestContext::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(media.bytes.as_ref(), b"seg1seg3");
        assert_eq!(media.report.failed_count, 1);
    }

    #[tokio::test]
    async fn test_missing_key_aborts() {
        let memory = Arc::new(MemoryFetcher::new());
        memory.route(
            &url("nokey/index.m3u8"),
            "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key\"\nseg0.ts\n",
        );
        memory.route(&url("nokey/seg0.ts"), vec![0u8; 32]);

        let err = engine(memory)
            .fetch_media(&url("nokey/index.m3u8"), RequestContext::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::KeyFetch { .. }));
        assert_eq!(err.category(), ErrorCategory::Decryption);
    }

    #[tokio::test]
    async fn test_parallel_jobs_share_the_registry() {
        let memory = Arc::new(MemoryFetcher::new());
        for name in ["a", "b"] {
            memory.route(
                &url(&format!("{}/index.m3u8", name)),
                "#EXTM3U\n0.ts\n1.ts\n",
            );
            for i in 0..2 {
                memory.route(
                    &url(&format!("{}/{}.ts", name, i)),
                    format!("{}{}", name, i).into_bytes(),
                );
            }
        }
        let engine = engine(memory);

        let a = engine
            .capture("tab-1", &url("a/index.m3u8"), None, RequestContext::new())
            .await;
        let b = engine
            .capture("tab-2", &url("b/index.m3u8"), None, RequestContext::new())
            .await;

        let (first, second) = tokio::join!(
            engine.download(a, |_, _| {}),
            engine.download(b, |_, _| {})
        );
        assert_eq!(first.unwrap().bytes.as_ref(), b"a0a1");
        assert_eq!(second.unwrap().bytes.as_ref(), b"b0b1");
        assert_eq!(engine.job(a).await.unwrap().status, JobStatus::Completed);
        assert_eq!(engine.job(b).await.unwrap().status, JobStatus::Completed);
    }
}
