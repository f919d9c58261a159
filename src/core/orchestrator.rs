//! Resolution orchestrator - single entry point of the engine
//!
//! Drives a captured URL through `captured → parsing → {ready, auth_error, parse_error}` and,
//! on download, `downloading → {completed, failed}`. Master playlists are followed to the
//! selected variant until a media playlist is reached; every download of an HLS source
//! re-fetches and re-parses its playlist so expiring segment URLs are refreshed.
//!
//! Jobs live in a [`JobRegistry`] owned by the orchestrator. Independent jobs may run in
//! parallel; each only touches its own registry entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::{Origin, Url};

use crate::core::config::EngineConfig;
use crate::core::encryption::EncryptionContext;
use crate::core::error_handling::{EngineError, EngineResult};
use crate::core::fetcher::{Fetcher, HttpFetcher, PlaylistFetcher};
use crate::core::models::{
    ContainerKind, DownloadJob, DownloadReport, JobId, JobStatus, MasterPlaylist, MediaKind,
    MediaPlaylist, Playlist, ReassembledMedia, SegmentCount,
};
use crate::core::segment_pipeline::{PipelineSettings, ProgressFn, SegmentPipeline};
use crate::core::variant_selector::VariantSelector;
use crate::parsers::parse_playlist;
use crate::utils::network::RequestContext;

/// Outcome of walking a playlist chain
enum Resolution {
    Media(MediaPlaylist),
    /// Stopped at a master because variant selection is deferred
    Master(MasterPlaylist),
}

struct JobEntry {
    job: DownloadJob,
    request: RequestContext,
}

/// Jobs by id, plus the capture order of each context
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, JobEntry>,
    by_context: HashMap<String, Vec<JobId>>,
    origins: HashMap<String, Origin>,
}

impl JobRegistry {
    fn insert(&mut self, job: DownloadJob, request: RequestContext) -> JobId {
        let id = job.id;
        self.by_context
            .entry(job.context.clone())
            .or_default()
            .push(id);
        self.jobs.insert(id, JobEntry { job, request });
        id
    }

    fn find(&self, context: &str, url: &str) -> Option<JobId> {
        self.by_context.get(context)?.iter().copied().find(|id| {
            self.jobs
                .get(id)
                .map(|entry| entry.job.source_url == url)
                .unwrap_or(false)
        })
    }

    fn entry(&self, id: JobId) -> EngineResult<&JobEntry> {
        self.jobs.get(&id).ok_or(EngineError::UnknownJob(id))
    }

    /// Apply `update` to a job if it still exists; it may have been discarded meanwhile
    fn update(&mut self, id: JobId, update: impl FnOnce(&mut DownloadJob)) {
        if let Some(entry) = self.jobs.get_mut(&id) {
            update(&mut entry.job);
            entry.job.touch();
        }
    }

    fn remove(&mut self, id: JobId) -> Option<DownloadJob> {
        let entry = self.jobs.remove(&id)?;
        if let Some(ids) = self.by_context.get_mut(&entry.job.context) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_context.remove(&entry.job.context);
            }
        }
        Some(entry.job)
    }

    fn remove_context(&mut self, context: &str) -> usize {
        let ids = self.by_context.remove(context).unwrap_or_default();
        ids.iter()
            .filter(|id| self.jobs.remove(*id).is_some())
            .count()
    }

    /// Origin of the page that produced the context's oldest job
    fn first_job_origin(&self, context: &str) -> Option<Origin> {
        let first = self.by_context.get(context)?.first()?;
        let job = &self.jobs.get(first)?.job;
        let page = job.initiator.as_deref().unwrap_or(&job.source_url);
        Url::parse(page).ok().map(|url| url.origin())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Clone)]
pub struct ResolutionOrchestrator {
    config: EngineConfig,
    fetcher: PlaylistFetcher,
    selector: VariantSelector,
    registry: Arc<RwLock<JobRegistry>>,
}

impl ResolutionOrchestrator {
    pub fn new(config: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            config,
            fetcher: PlaylistFetcher::new(fetcher),
            selector: VariantSelector::new(),
            registry: Arc::new(RwLock::new(JobRegistry::default())),
        }
    }

    /// Orchestrator backed by a reqwest client built from `config`
    pub fn with_http(config: EngineConfig) -> EngineResult<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::new(config, Arc::new(fetcher)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn prepare_request(&self, request: RequestContext) -> RequestContext {
        request.with_defaults(&self.config.headers, &self.config.cookies)
    }

    /// Register a URL observed in `context`; returns the existing job for a repeat capture.
    ///
    /// HLS sources are fetched and classified right away. A failure there is recorded on the
    /// job (`auth_error` / `parse_error`) rather than returned.
    pub async fn capture(
        &self,
        context: &str,
        url: &str,
        initiator: Option<&str>,
        request: RequestContext,
    ) -> JobId {
        let (id, is_hls) = {
            let mut registry = self.registry.write().await;
            if let Some(existing) = registry.find(context, url) {
                tracing::debug!("Already captured in {}: {}", context, url);
                return existing;
            }

            let mut job = DownloadJob::new(context, url);
            job.initiator = initiator.map(str::to_string);
            let is_hls = job.kind.is_hls();
            if !is_hls {
                job.status = JobStatus::Ready;
            }
            tracing::info!("📥 Captured {:?} source in {}: {}", job.kind, context, url);
            (registry.insert(job, self.prepare_request(request)), is_hls)
        };

        if is_hls {
            if let Err(e) = self.reparse(id).await {
                tracing::warn!("Playlist for job {} is not usable: {}", id, e);
            }
        }
        id
    }

    /// Fetch and classify a job's playlist again, updating its segments and status
    pub async fn reparse(&self, id: JobId) -> EngineResult<JobStatus> {
        let (url, request) = {
            let mut registry = self.registry.write().await;
            let entry = registry.entry(id)?;
            let snapshot = (entry.job.source_url.clone(), entry.request.clone());
            registry.update(id, |job| job.status = JobStatus::Parsing);
            snapshot
        };

        let outcome = self
            .walk(&url, &request, self.config.defer_master_resolution)
            .await;

        let mut registry = self.registry.write().await;
        match outcome {
            Ok(Resolution::Media(media)) => {
                let count = media.segments.len();
                tracing::info!(
                    "Job {} ready: {} segments (encrypted: {})",
                    id,
                    count,
                    media.is_encrypted()
                );
                registry.update(id, |job| {
                    job.status = JobStatus::Ready;
                    job.segment_count = SegmentCount::Known(count);
                    job.segments = Some(media);
                    job.error = None;
                });
                Ok(JobStatus::Ready)
            }
            Ok(Resolution::Master(master)) => {
                tracing::info!(
                    "Job {} is a master playlist with {} variants, selection deferred",
                    id,
                    master.variants.len()
                );
                registry.update(id, |job| {
                    job.status = JobStatus::Ready;
                    job.segment_count = SegmentCount::Unresolved;
                    job.segments = None;
                    job.error = None;
                });
                Ok(JobStatus::Ready)
            }
            Err(e) => {
                let status = if e.requires_authentication() {
                    JobStatus::AuthError
                } else {
                    JobStatus::ParseError
                };
                registry.update(id, |job| {
                    job.status = status;
                    job.segment_count = SegmentCount::Known(0);
                    job.segments = None;
                    job.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Follow `url` through any master playlists down to a media playlist
    pub async fn resolve(&self, url: &str, request: &RequestContext) -> EngineResult<MediaPlaylist> {
        match self.walk(url, request, false).await? {
            Resolution::Media(media) => Ok(media),
            Resolution::Master(master) => Err(EngineError::parse(
                &master.url,
                "master playlist left unresolved",
            )),
        }
    }

    async fn walk(
        &self,
        url: &str,
        request: &RequestContext,
        stop_at_master: bool,
    ) -> EngineResult<Resolution> {
        let max_depth = self.config.max_playlist_depth;
        let mut visited = HashSet::new();
        let mut current = url.to_string();

        for depth in 0..=max_depth {
            if !visited.insert(current.clone()) {
                return Err(EngineError::parse(&current, "playlist references itself"));
            }

            let text = self.fetcher.playlist_text(&current, request).await?;
            let master = match parse_playlist(&text, &current)? {
                Playlist::Media(media) => return Ok(Resolution::Media(media)),
                Playlist::Master(master) => master,
            };

            if stop_at_master && depth == 0 {
                return Ok(Resolution::Master(master));
            }

            let (variant, tier) = self
                .selector
                .select_with_tier(&master)
                .ok_or_else(|| EngineError::parse(&current, "master playlist lists no variants"))?;
            tracing::debug!(
                "Selected variant {} ({:?}, {} bps)",
                variant.url,
                tier,
                variant.bandwidth
            );
            current = variant.url.clone();
        }

        Err(EngineError::parse(
            url,
            format!("more than {} nested master playlists", max_depth),
        ))
    }

    /// Download a captured job and return the reassembled buffer
    pub async fn download<F>(&self, id: JobId, mut progress: F) -> EngineResult<ReassembledMedia>
    where
        F: FnMut(usize, usize) + Send,
    {
        let (url, kind, request) = {
            let mut registry = self.registry.write().await;
            let entry = registry.entry(id)?;
            let snapshot = (entry.job.source_url.clone(), entry.job.kind, entry.request.clone());
            registry.update(id, |job| {
                job.status = JobStatus::Downloading;
                job.error = None;
            });
            snapshot
        };
        tracing::info!("🔄 Started download: {}", id);

        let outcome = self.fetch_source(&url, kind, &request, &mut progress).await;

        let mut registry = self.registry.write().await;
        match outcome {
            Ok((media, output)) => {
                tracing::info!(
                    "✅ Download completed: {} ({} bytes, {} failed segments)",
                    id,
                    output.report.bytes_assembled,
                    output.report.failed_count
                );
                registry.update(id, |job| {
                    if let Some(media) = media {
                        job.segment_count = SegmentCount::Known(media.segments.len());
                        job.segments = Some(media);
                    }
                    job.status = JobStatus::Completed;
                    job.bytes_total = output.report.bytes_assembled;
                    job.bytes_downloaded = output.report.bytes_assembled;
                    job.failed_count = output.report.failed_count;
                });
                Ok(output)
            }
            Err(e) => {
                tracing::error!("❌ Download failed: {} - {}", id, e);
                let status = if e.requires_authentication() {
                    JobStatus::AuthError
                } else {
                    JobStatus::Failed
                };
                registry.update(id, |job| {
                    job.status = status;
                    job.error = Some(e.to_string());
                    if let EngineError::NoSegmentsDownloaded { failed, .. }
                    | EngineError::TooManySegmentFailures { failed, .. } = &e
                    {
                        job.failed_count = *failed;
                    }
                });
                Err(e)
            }
        }
    }

    /// Resolve and download `url` in one go, without creating a job
    pub async fn fetch_media<F>(
        &self,
        url: &str,
        request: RequestContext,
        mut progress: F,
    ) -> EngineResult<ReassembledMedia>
    where
        F: FnMut(usize, usize) + Send,
    {
        let request = self.prepare_request(request);
        let (_, output) = self
            .fetch_source(url, MediaKind::from_url(url), &request, &mut progress)
            .await?;
        Ok(output)
    }

    async fn fetch_source(
        &self,
        url: &str,
        kind: MediaKind,
        request: &RequestContext,
        progress: ProgressFn<'_>,
    ) -> EngineResult<(Option<MediaPlaylist>, ReassembledMedia)> {
        if !kind.is_hls() {
            return self
                .fetch_direct(url, request, progress)
                .await
                .map(|output| (None, output));
        }

        let media = self.resolve(url, request).await?;
        let encryption = match &media.encryption {
            Some(info) => Some(EncryptionContext::establish(info, &self.fetcher, request).await?),
            None => None,
        };

        let pipeline =
            SegmentPipeline::new(&self.fetcher, request, PipelineSettings::from(&self.config));
        let output = pipeline.run(&media, encryption.as_ref(), progress).await?;
        Ok((Some(media), output))
    }

    async fn fetch_direct(
        &self,
        url: &str,
        request: &RequestContext,
        progress: ProgressFn<'_>,
    ) -> EngineResult<ReassembledMedia> {
        progress(1, 1);
        let bytes = self.fetcher.bytes(url, request).await?;
        let report = DownloadReport {
            segments_total: 1,
            segments_downloaded: 1,
            bytes_assembled: bytes.len() as u64,
            ..DownloadReport::default()
        };
        Ok(ReassembledMedia {
            bytes,
            container: ContainerKind::infer(false, false),
            report,
        })
    }

    pub async fn job(&self, id: JobId) -> Option<DownloadJob> {
        self.registry
            .read()
            .await
            .jobs
            .get(&id)
            .map(|entry| entry.job.clone())
    }

    /// Jobs of `context` in capture order
    pub async fn jobs_for_context(&self, context: &str) -> Vec<DownloadJob> {
        let registry = self.registry.read().await;
        registry
            .by_context
            .get(context)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| registry.jobs.get(id))
                    .map(|entry| entry.job.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn job_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn remove_job(&self, id: JobId) -> EngineResult<DownloadJob> {
        let removed = self
            .registry
            .write()
            .await
            .remove(id)
            .ok_or(EngineError::UnknownJob(id))?;
        tracing::info!("🗑️ Removed job: {}", id);
        Ok(removed)
    }

    /// Drop every job owned by `context`, e.g. when a tab closes
    pub async fn discard_context(&self, context: &str) -> usize {
        let mut registry = self.registry.write().await;
        registry.origins.remove(context);
        let removed = registry.remove_context(context);
        if removed > 0 {
            tracing::info!("🧹 Discarded {} jobs of {}", removed, context);
        }
        removed
    }

    /// Record that `context` now shows `new_url`; its jobs are discarded when the origin
    /// changes. Without an earlier navigation the first job's initiator (or its own URL)
    /// stands in for the previous page. Returns the number of jobs removed.
    pub async fn navigate(&self, context: &str, new_url: &str) -> usize {
        let Ok(parsed) = Url::parse(new_url) else {
            tracing::debug!("{} navigated to unparseable URL {:?}, keeping jobs", context, new_url);
            return 0;
        };
        let origin = parsed.origin();

        let mut registry = self.registry.write().await;
        let previous = registry
            .origins
            .get(context)
            .cloned()
            .or_else(|| registry.first_job_origin(context));

        let removed = match previous {
            Some(previous) if previous != origin => registry.remove_context(context),
            _ => 0,
        };
        registry.origins.insert(context.to_string(), origin);

        if removed > 0 {
            tracing::info!("{} navigated to a new origin, discarded {} jobs", context, removed);
        }
        removed
    }
}
