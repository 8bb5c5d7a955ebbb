//! Report Crawler Library
//!
//! Lists research reports from a report portal, resolves each one to its PDF
//! and downloads it through a browser-backed session that the portal's
//! anti-bot checks accept.
//!
//! # Architecture
//!
//! - [`model`] - Categories, report records, artifacts and outcomes
//! - [`validate`] - PDF payload checks and interstitial detection
//! - [`storage`] - Artifact filenames and the output directory layout
//! - [`site`] - Hosts and page structure of the source portal
//! - [`db`] - SQLite connection and migrations
//! - [`cache`] - Time-limited cache of resolved artifact lists
//! - [`parser`] - List and detail page extraction
//! - [`session`] - Browser actor that owns cookies and page fetches
//! - [`download`] - Tiered acquisition with validation
//! - [`handler`] - Per-category listing: scraped pages or structured APIs
//! - [`crawler`] - Orchestration, batching and the worker pool
//! - [`config`] - Config file parsing and resolved settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod crawler;
pub mod db;
pub mod download;
pub mod handler;
pub mod model;
pub mod parser;
pub mod session;
pub mod site;
pub mod storage;
mod user_agent;
pub mod validate;

// Re-export commonly used types
pub use cache::{CacheError, CacheStore};
pub use crawler::{
    ArtifactEntry, BatchResponse, BatchStats, CacheTag, CrawlError, CrawlReport, CrawlerConfig,
    CrawlerService,
};
pub use db::Database;
pub use download::{Downloader, HttpFetcher, RetryPolicy};
pub use handler::{HandlerRegistry, TypeHandler};
pub use model::{
    AcquisitionOutcome, AcquisitionStatus, Artifact, ArtifactState, Category, ReportRecord,
};
pub use parser::Parser;
pub use session::{Session, SessionBroker};
pub use site::SiteProfile;
pub use storage::StorageLayout;
pub use validate::{ContentValidator, Rejection};
