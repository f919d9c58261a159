//! Sequential segment download and reassembly
//!
//! Segments are fetched one at a time, in playlist order, and appended to a single buffer.
//! A segment that cannot be fetched is skipped and counted; the output then has a gap where
//! it would have been. The optional init segment always comes first.

use bytes::{Bytes, BytesMut};
use std::time::Duration;

use crate::core::config::{DecryptFailurePolicy, EngineConfig};
use crate::core::encryption::EncryptionContext;
use crate::core::error_handling::{EngineError, EngineResult};
use crate::core::fetcher::PlaylistFetcher;
use crate::core::models::{ContainerKind, DownloadReport, MediaPlaylist, ReassembledMedia};
use crate::utils::network::RequestContext;

/// Progress sink: `(current_segment, total_segments)`, `current` counts from 1
pub type ProgressFn<'a> = &'a mut (dyn FnMut(usize, usize) + Send);

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub yield_every_segments: usize,
    pub yield_delay: Duration,
    pub decrypt_failure_policy: DecryptFailurePolicy,
    pub max_failed_segments: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PipelineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            yield_every_segments: config.yield_every_segments.max(1),
            yield_delay: config.yield_delay(),
            decrypt_failure_policy: config.decrypt_failure_policy,
            max_failed_segments: config.max_failed_segments,
        }
    }
}

pub struct SegmentPipeline<'a> {
    fetcher: &'a PlaylistFetcher,
    request: &'a RequestContext,
    settings: PipelineSettings,
}

impl<'a> SegmentPipeline<'a> {
    pub fn new(
        fetcher: &'a PlaylistFetcher,
        request: &'a RequestContext,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            request,
            settings,
        }
    }

    /// Download, decrypt and concatenate every segment of `playlist`
    pub async fn run(
        &self,
        playlist: &MediaPlaylist,
        encryption: Option<&EncryptionContext>,
        progress: ProgressFn<'_>,
    ) -> EngineResult<ReassembledMedia> {
        let total = playlist.segments.len();
        let mut buffer = BytesMut::new();
        let mut report = DownloadReport {
            segments_total: total,
            ..DownloadReport::default()
        };

        tracing::info!(
            "Downloading {} segments (encrypted: {})",
            total,
            encryption.is_some()
        );

        if let Some(init_url) = &playlist.init_segment_url {
            match self.fetcher.bytes(init_url, self.request).await {
                Ok(init) => {
                    tracing::debug!("Init segment: {} bytes", init.len());
                    buffer.extend_from_slice(&init);
                    report.init_segment_included = true;
                }
                Err(e) => tracing::warn!("Init segment failed, continuing without it: {}", e),
            }
        }

        for (index, segment) in playlist.segments.iter().enumerate() {
            progress(index + 1, total);

            match self.fetcher.bytes(&segment.url, self.request).await {
                Ok(data) => {
                    let chunk = match encryption {
                        Some(ctx) => self.decrypt_or_fallback(ctx, index, data, &mut report)?,
                        None => data,
                    };
                    buffer.extend_from_slice(&chunk);
                    report.segments_downloaded += 1;

                    if index % 50 == 0 {
                        tracing::debug!(
                            "Progress: {}/{} segments, {:.1} MB",
                            index + 1,
                            total,
                            buffer.len() as f64 / 1024.0 / 1024.0
                        );
                    }
                }
                Err(e) => {
                    report.failed_count += 1;
                    let err = EngineError::SegmentFetch {
                        index,
                        url: segment.url.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!("{}", err);

                    if let Some(limit) = self.settings.max_failed_segments {
                        if report.failed_count > limit {
                            return Err(EngineError::TooManySegmentFailures {
                                total,
                                failed: report.failed_count,
                                limit,
                            });
                        }
                    }
                }
            }

            let done = index + 1;
            if done % self.settings.yield_every_segments == 0 && done < total {
                self.pause().await;
            }
        }

        tracing::info!(
            "Downloaded {}/{} segments ({} failed)",
            report.segments_downloaded,
            total,
            report.failed_count
        );

        if report.segments_downloaded == 0 && !report.init_segment_included {
            return Err(EngineError::NoSegmentsDownloaded {
                total,
                failed: report.failed_count,
            });
        }

        report.bytes_assembled = buffer.len() as u64;
        Ok(ReassembledMedia {
            bytes: buffer.freeze(),
            container: ContainerKind::infer(true, playlist.init_segment_url.is_some()),
            report,
        })
    }

    fn decrypt_or_fallback(
        &self,
        ctx: &EncryptionContext,
        index: usize,
        data: Bytes,
        report: &mut DownloadReport,
    ) -> EngineResult<Bytes> {
        match ctx.decrypt(index, &data) {
            Ok(plain) => Ok(Bytes::from(plain)),
            Err(e) => match self.settings.decrypt_failure_policy {
                DecryptFailurePolicy::FallbackToCiphertext => {
                    tracing::error!("{}, keeping raw data", e);
                    report.decrypt_failures += 1;
                    Ok(data)
                }
                DecryptFailurePolicy::FailJob => Err(e),
            },
        }
    }

    async fn pause(&self) {
        if self.settings.yield_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.settings.yield_delay).await;
        }
    }
}
