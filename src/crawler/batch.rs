//! Multi-category request parsing and the batch response shape.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::CrawlError;
use crate::model::{AcquisitionOutcome, AcquisitionStatus, Artifact, ArtifactState, Category};

/// Largest `limit` a batch request may ask for.
pub const MAX_LIMIT: usize = 50;

/// Default `limit` when a request gives none.
pub const DEFAULT_LIMIT: usize = 6;

/// How a category's artifacts were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTag {
    /// Served from a fresh cache entry.
    Cached,
    /// Cache missed; crawl pending or in progress.
    Fetching,
    /// Crawled after a cache miss.
    Fetched,
    /// Crawled because the caller bypassed the cache.
    ForceRefresh,
    /// The category's crawl failed; its data is empty.
    Error,
}

impl CacheTag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::ForceRefresh => "force_refresh",
            Self::Error => "error",
        }
    }
}

/// Per-crawl counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Records resolved to a binary URL.
    pub resolved: usize,
    /// Records dropped: bad reference, unreachable detail page or no link.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchStats {
    fn absorb(&mut self, other: BatchStats) {
        self.resolved += other.resolved;
        self.skipped += other.skipped;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// One artifact with where it ended up.
///
/// `state` is `url_resolved` when nothing was downloaded (cache hit or
/// downloads disabled), otherwise `validated` or `failed`.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactEntry {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub state: ArtifactState,
    pub status: Option<AcquisitionStatus>,
    pub tier: Option<&'static str>,
}

impl ArtifactEntry {
    /// An artifact that was resolved but not downloaded.
    #[must_use]
    pub fn resolved(artifact: Artifact) -> Self {
        Self {
            artifact,
            state: ArtifactState::UrlResolved,
            status: None,
            tier: None,
        }
    }

    /// An artifact whose download finished in `state`.
    #[must_use]
    pub fn downloaded(outcome: &AcquisitionOutcome, state: ArtifactState) -> Self {
        Self {
            artifact: outcome.artifact.clone(),
            state,
            status: Some(outcome.status),
            tier: outcome.tier,
        }
    }
}

/// Combined result of [`CrawlerService::crawl_many`](super::CrawlerService::crawl_many).
///
/// `success` is false when any category errored or any download failed;
/// `stats` and `stats_by_type` carry the counts either way.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub data: Vec<ArtifactEntry>,
    pub count: usize,
    pub by_type: BTreeMap<Category, usize>,
    pub stats: BatchStats,
    pub stats_by_type: BTreeMap<Category, BatchStats>,
    pub requested_types: Vec<Category>,
    pub limit: usize,
    pub cache_status: BTreeMap<Category, CacheTag>,
    pub force_refresh: bool,
}

impl BatchResponse {
    pub(super) fn new(requested_types: Vec<Category>, limit: usize, force_refresh: bool) -> Self {
        Self {
            success: true,
            data: Vec::new(),
            count: 0,
            by_type: BTreeMap::new(),
            stats: BatchStats::default(),
            stats_by_type: BTreeMap::new(),
            requested_types,
            limit,
            cache_status: BTreeMap::new(),
            force_refresh,
        }
    }

    /// Folds one category's result in.
    pub(super) fn record(
        &mut self,
        category: Category,
        tag: CacheTag,
        stats: BatchStats,
        entries: Vec<ArtifactEntry>,
    ) {
        if tag == CacheTag::Error || stats.failed > 0 {
            self.success = false;
        }
        self.by_type.insert(category, entries.len());
        self.cache_status.insert(category, tag);
        self.stats_by_type.insert(category, stats);
        self.stats.absorb(stats);
        self.data.extend(entries);
        self.count = self.data.len();
    }
}

/// Parses `all` or a comma-separated category list, dropping duplicates.
///
/// # Errors
///
/// Returns [`CrawlError::UnknownCategory`] for an unrecognized name and
/// [`CrawlError::NoCategories`] when nothing is left.
pub fn parse_categories(selection: &str) -> Result<Vec<Category>, CrawlError> {
    if selection.trim().eq_ignore_ascii_case("all") {
        return Ok(Category::ALL.to_vec());
    }
    let mut categories = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let category: Category = part.parse()?;
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    if categories.is_empty() {
        return Err(CrawlError::NoCategories);
    }
    Ok(categories)
}

/// # Errors
///
/// Returns [`CrawlError::InvalidLimit`] outside `1..=MAX_LIMIT`.
pub fn validate_limit(limit: usize) -> Result<usize, CrawlError> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(CrawlError::InvalidLimit {
            limit,
            max: MAX_LIMIT,
        })
    }
}
