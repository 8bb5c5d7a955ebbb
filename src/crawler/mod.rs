//! Crawl orchestration.
//!
//! [`CrawlerService`] ties the pipeline together for one category:
//!
//! 1. serve a fresh cache entry unless the caller forces a refresh;
//! 2. list records through the category's [`TypeHandler`], fetching the list
//!    page through the browser for scraped categories;
//! 3. resolve each record to a binary URL (direct references are accepted,
//!    otherwise the detail page is fetched once and its HTML kept);
//! 4. establish one browser session for the batch, dropping whatever session
//!    an earlier batch left behind;
//! 5. download every artifact over plain HTTP on a bounded [`WorkerPool`];
//! 6. attach keyword metadata and cache the resolved artifact list.
//!
//! Failures stay as small as possible: a bad record is skipped, a failed
//! download is reported in its outcome, and in [`CrawlerService::crawl_many`]
//! a failed category is tagged while the others still run.
//!
//! [`TypeHandler`]: crate::handler::TypeHandler

mod batch;
mod error;
mod pool;

pub use batch::{
    ArtifactEntry, BatchResponse, BatchStats, CacheTag, DEFAULT_LIMIT, MAX_LIMIT, parse_categories,
    validate_limit,
};
pub use error::CrawlError;
pub use pool::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS, PoolError, WorkerPool};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::cache::{CacheStatus, CacheStore};
use crate::download::{Downloader, HttpFetcher, infer_referer};
use crate::handler::{HandlerKind, HandlerRegistry};
use crate::model::{AcquisitionOutcome, AcquisitionStatus, Artifact, ArtifactState, Category, ReportRecord};
use crate::parser::Parser;
use crate::session::{PageKind, SessionBroker};
use crate::site::SiteProfile;
use crate::storage::StorageLayout;
use crate::validate::ContentValidator;

/// Tuning for a [`CrawlerService`].
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Download worker count.
    pub workers: usize,
    /// When false, crawls stop after resolving artifact URLs.
    pub download_artifacts: bool,
    /// Where fetched list pages are saved as `{category}_list.html`.
    pub debug_dir: Option<PathBuf>,
    pub http_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            download_artifacts: true,
            debug_dir: None,
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of crawling one category.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub category: Category,
    pub tag: CacheTag,
    /// Resolved artifacts in list order.
    pub artifacts: Vec<Artifact>,
    /// One per downloaded artifact; empty for cache hits or when downloads
    /// are disabled.
    pub outcomes: Vec<AcquisitionOutcome>,
    /// One per artifact, in list order, with its final state.
    pub entries: Vec<ArtifactEntry>,
    pub stats: BatchStats,
}

pub struct CrawlerService {
    site: SiteProfile,
    parser: Parser,
    handlers: HandlerRegistry,
    cache: CacheStore,
    broker: SessionBroker,
    storage: StorageLayout,
    pool: WorkerPool,
    batch_downloader: Arc<Downloader>,
    single_downloader: Downloader,
    validator: ContentValidator,
    config: CrawlerConfig,
}

impl std::fmt::Debug for CrawlerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlerService")
            .field("site", &self.site)
            .field("handlers", &self.handlers)
            .field("storage", &self.storage)
            .field("workers", &self.pool.width())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CrawlerService {
    /// Assembles the service and evicts expired cache entries.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] when the worker count is out of range, the
    /// HTTP client cannot be built, or the cache cleanup fails.
    #[instrument(skip_all, fields(workers = config.workers))]
    pub async fn start(
        site: SiteProfile,
        handlers: HandlerRegistry,
        cache: CacheStore,
        broker: SessionBroker,
        storage: StorageLayout,
        config: CrawlerConfig,
    ) -> Result<Self, CrawlError> {
        let pool = WorkerPool::new(config.workers)?;
        let fetcher = HttpFetcher::with_timeout(&site, config.http_timeout)?;
        let batch_downloader = Arc::new(Downloader::http_only(fetcher.clone(), site.clone()));
        let single_downloader = Downloader::standard(broker.clone(), fetcher, site.clone());

        let evicted = cache.cleanup_expired().await?;
        info!(evicted, "crawler service ready");

        Ok(Self {
            parser: Parser::new(site.clone()),
            site,
            handlers,
            cache,
            broker,
            storage,
            pool,
            batch_downloader,
            single_downloader,
            validator: ContentValidator::default(),
            config,
        })
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    #[must_use]
    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    /// Crawls one category as its own batch.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] when the limit is zero or above
    /// [`MAX_LIMIT`], the category has no handler, its listing fails, or
    /// the broker is gone. Per-record and per-download failures are not
    /// errors; they show up in the report's stats and entries.
    #[instrument(skip(self))]
    pub async fn crawl(
        &self,
        category: Category,
        limit: usize,
        force: bool,
    ) -> Result<CrawlReport, CrawlError> {
        let limit = validate_limit(limit)?;
        self.broker.invalidate().await?;
        self.crawl_category(category, limit, force).await
    }

    #[instrument(skip(self))]
    async fn crawl_category(
        &self,
        category: Category,
        limit: usize,
        force: bool,
    ) -> Result<CrawlReport, CrawlError> {
        if !force {
            match self.cache.get(category, limit).await {
                Ok(Some(artifacts)) => {
                    info!(count = artifacts.len(), "serving cached artifacts");
                    let source = self.handlers.get(category).map_or("cache", |h| h.name());
                    let now = Utc::now();
                    let artifacts: Vec<Artifact> = artifacts
                        .into_iter()
                        .map(|a| {
                            if a.metadata.is_some() {
                                a
                            } else {
                                a.with_metadata(source, now)
                            }
                        })
                        .collect();
                    return Ok(CrawlReport {
                        category,
                        tag: CacheTag::Cached,
                        stats: BatchStats {
                            resolved: artifacts.len(),
                            ..BatchStats::default()
                        },
                        entries: artifacts.iter().cloned().map(ArtifactEntry::resolved).collect(),
                        artifacts,
                        outcomes: Vec::new(),
                    });
                }
                Ok(None) => {}
                Err(error) => warn!(error = %error, "cache read failed; crawling"),
            }
        }

        let (source, records) = self.list_records(category, limit).await?;
        let listed = records.len();
        let now = Utc::now();
        let mut artifacts = Vec::with_capacity(listed);
        for record in records {
            if let Some(artifact) = self.resolve(record).await {
                artifacts.push(artifact.with_metadata(source, now));
            }
        }

        let finished = if self.config.download_artifacts && !artifacts.is_empty() {
            self.download_all(&artifacts).await?
        } else {
            Vec::new()
        };
        let entries = entries_for(&artifacts, &finished);
        let outcomes: Vec<AcquisitionOutcome> =
            finished.into_iter().map(|(outcome, _)| outcome).collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let stats = BatchStats {
            resolved: artifacts.len(),
            skipped: listed - artifacts.len(),
            succeeded,
            failed: entries
                .iter()
                .filter(|e| e.state == ArtifactState::Failed)
                .count(),
        };
        info!(
            listed,
            resolved = stats.resolved,
            skipped = stats.skipped,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "category crawled"
        );

        if artifacts.is_empty() {
            debug!("nothing resolved; cache left untouched");
        } else if let Err(error) = self.cache.set(category, limit, &artifacts).await {
            warn!(error = %error, "cache write failed");
        }

        Ok(CrawlReport {
            category,
            tag: if force {
                CacheTag::ForceRefresh
            } else {
                CacheTag::Fetched
            },
            artifacts,
            outcomes,
            entries,
            stats,
        })
    }

    /// Crawls several categories in turn, as one batch sharing one session,
    /// and merges the results.
    ///
    /// A failing category is tagged [`CacheTag::Error`] with no data; the
    /// rest still run.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] only for an invalid limit, an empty category
    /// list or a stopped broker.
    #[instrument(skip(self, categories), fields(categories = categories.len()))]
    pub async fn crawl_many(
        &self,
        categories: &[Category],
        limit: usize,
        force: bool,
    ) -> Result<BatchResponse, CrawlError> {
        let limit = validate_limit(limit)?;
        if categories.is_empty() {
            return Err(CrawlError::NoCategories);
        }

        self.broker.invalidate().await?;

        let mut response = BatchResponse::new(categories.to_vec(), limit, force);
        for &category in categories {
            debug!(%category, tag = CacheTag::Fetching.as_str(), "category started");
            match self.crawl_category(category, limit, force).await {
                Ok(report) => {
                    response.record(category, report.tag, report.stats, report.entries);
                }
                Err(error) => {
                    warn!(%category, error = %error, "category failed");
                    response.record(category, CacheTag::Error, BatchStats::default(), Vec::new());
                }
            }
        }
        info!(
            count = response.count,
            succeeded = response.stats.succeeded,
            failed = response.stats.failed,
            skipped = response.stats.skipped,
            success = response.success,
            "batch finished"
        );
        Ok(response)
    }

    /// Acquires one binary through every tier, browser tiers first.
    ///
    /// A valid file already at the destination is reused.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::InvalidReference`] for a non-http(s) URL and
    /// [`CrawlError::Session`] when the broker is gone. Download failures
    /// are reported in the outcome.
    #[instrument(skip(self))]
    pub async fn fetch_artifact(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<AcquisitionOutcome, CrawlError> {
        let url = url.trim();
        let parsed = url::Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| CrawlError::InvalidReference(url.to_string()))?;

        let referer = infer_referer(referer, url, &self.site);
        let inferred = Category::from_url(&referer);
        let record = ReportRecord::new(
            "",
            "",
            referer.clone(),
            inferred.unwrap_or(Category::Strategy),
        );
        let artifact = Artifact::new(parsed.as_str(), record);
        let destination = match inferred {
            Some(category) => self.storage.directory_for(category),
            None => self.storage.root().to_path_buf(),
        }
        .join(&artifact.filename);

        if let Ok(existing) = tokio::fs::read(&destination).await
            && self.validator.validate(&existing)
        {
            info!(path = %destination.display(), "reusing downloaded artifact");
            return Ok(AcquisitionOutcome {
                artifact,
                status: AcquisitionStatus::Success,
                bytes_written: Some(destination),
                bytes_received: existing.len(),
                tier: Some("existing"),
                rejection: None,
            });
        }

        let session = self.broker.establish(Some(&referer)).await?;
        Ok(self
            .single_downloader
            .acquire(&artifact, &destination, Some(&referer), &session)
            .await)
    }

    /// # Errors
    ///
    /// Returns [`CrawlError::Cache`] if the query fails.
    pub async fn cache_status(&self) -> Result<CacheStatus, CrawlError> {
        Ok(self.cache.status().await?)
    }

    /// See [`CacheStore::clear`].
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Cache`] if the delete fails.
    pub async fn clear_cache(
        &self,
        category: Option<Category>,
        limit: Option<usize>,
    ) -> Result<u64, CrawlError> {
        Ok(self.cache.clear(category, limit).await?)
    }

    /// Closes the browser.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Session`] if the broker is already gone or the
    /// browser fails to close.
    pub async fn shutdown(&self) -> Result<(), CrawlError> {
        Ok(self.broker.shutdown().await?)
    }

    /// Lists records, returning the handler name alongside.
    async fn list_records(
        &self,
        category: Category,
        limit: usize,
    ) -> Result<(&'static str, Vec<ReportRecord>), CrawlError> {
        let handler = self.handlers.require(category)?;
        let records = match handler.kind() {
            HandlerKind::Scraped => {
                let list_url = handler.source_reference();
                let html = self
                    .broker
                    .fetch_html(list_url.as_str(), PageKind::List)
                    .await?;
                self.save_debug_html(category, &html).await;
                handler.list(Some(&html), limit).await?
            }
            HandlerKind::StructuredApi => handler.list(None, limit).await?,
        };
        if records.is_empty() {
            warn!(handler = handler.name(), "no reports listed");
        }
        Ok((handler.name(), records))
    }

    /// Resolves a record to an artifact, or `None` when it must be skipped.
    #[instrument(skip(self, record), fields(title = %record.title))]
    async fn resolve(&self, record: ReportRecord) -> Option<Artifact> {
        let mut state = ArtifactState::Pending;
        let Some(reference) = record.absolute_reference() else {
            debug!(reference = %record.detail_reference, "skipping record without absolute reference");
            advance(&mut state, ArtifactState::Failed);
            return None;
        };

        if self.site.is_binary_url(reference.as_str()) {
            advance(&mut state, ArtifactState::UrlResolved);
            return Some(Artifact::new(reference.as_str(), record));
        }

        let html = match self
            .broker
            .fetch_html(reference.as_str(), PageKind::Detail)
            .await
        {
            Ok(html) => html,
            Err(error) => {
                warn!(url = %reference, error = %error, "detail page fetch failed");
                advance(&mut state, ArtifactState::Failed);
                return None;
            }
        };
        advance(&mut state, ArtifactState::DetailResolved);

        if let Some(link) = self.parser.extract_detail_link(&html) {
            advance(&mut state, ArtifactState::UrlResolved);
            Some(Artifact::new(link.url, record).with_detail_html(Some(html)))
        } else {
            info!(url = %reference, "no binary link on detail page");
            advance(&mut state, ArtifactState::Failed);
            None
        }
    }

    /// Downloads every artifact, returning each outcome with the artifact's
    /// final state.
    async fn download_all(
        &self,
        artifacts: &[Artifact],
    ) -> Result<Vec<(AcquisitionOutcome, ArtifactState)>, CrawlError> {
        if let Some(first) = artifacts.first()
            && let Err(error) = self.storage.ensure_directory(first.report.category).await
        {
            warn!(error = %error, "could not create category directory");
        }
        let session = Arc::new(self.broker.establish(None).await?);
        let downloader = Arc::clone(&self.batch_downloader);
        let jobs: Vec<(Artifact, PathBuf)> = artifacts
            .iter()
            .map(|a| (a.clone(), self.storage.destination_for(a)))
            .collect();

        let outcomes = self
            .pool
            .run(jobs, move |(artifact, destination)| {
                let downloader = Arc::clone(&downloader);
                let session = Arc::clone(&session);
                async move {
                    let mut state = ArtifactState::UrlResolved;
                    advance(&mut state, ArtifactState::Downloading);
                    let outcome = downloader
                        .acquire(&artifact, &destination, artifact.detail_referer(), &session)
                        .await;
                    advance(
                        &mut state,
                        if outcome.is_success() {
                            ArtifactState::Validated
                        } else {
                            ArtifactState::Failed
                        },
                    );
                    (outcome, state)
                }
            })
            .await?;
        Ok(outcomes)
    }

    async fn save_debug_html(&self, category: Category, html: &str) {
        let Some(dir) = &self.config.debug_dir else {
            return;
        };
        let path = dir.join(format!("{category}_list.html"));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, html).await
        }
        .await;
        match result {
            Ok(()) => debug!(path = %path.display(), "list page saved"),
            Err(error) => warn!(path = %path.display(), error = %error, "could not save list page"),
        }
    }
}

/// Pairs each artifact with its download result, if it was downloaded.
fn entries_for(
    artifacts: &[Artifact],
    finished: &[(AcquisitionOutcome, ArtifactState)],
) -> Vec<ArtifactEntry> {
    let by_url: HashMap<&str, &(AcquisitionOutcome, ArtifactState)> = finished
        .iter()
        .map(|pair| (pair.0.artifact.source_url.as_str(), pair))
        .collect();
    artifacts
        .iter()
        .map(|artifact| match by_url.get(artifact.source_url.as_str()) {
            Some((outcome, state)) => ArtifactEntry::downloaded(outcome, *state),
            None if finished.is_empty() => ArtifactEntry::resolved(artifact.clone()),
            // worker panicked
            None => ArtifactEntry {
                artifact: artifact.clone(),
                state: ArtifactState::Failed,
                status: None,
                tier: None,
            },
        })
        .collect()
}

fn advance(state: &mut ArtifactState, next: ArtifactState) {
    debug_assert!(
        state.can_advance_to(next),
        "illegal artifact transition {state:?} -> {next:?}"
    );
    trace!(from = ?*state, to = ?next, "artifact state");
    *state = next;
}
