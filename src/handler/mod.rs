//! Per-category report listing strategies.
//!
//! A [`TypeHandler`] turns a category into [`ReportRecord`]s. Two kinds
//! exist, told apart by [`HandlerKind`] rather than by concrete type:
//!
//! - [`ScrapedHandler`] parses a list page that the crawler fetched through
//!   the browser session.
//! - [`StructuredApiHandler`] calls a [`ReportSource`] directly and ignores
//!   any page input.
//!
//! # Example
//!
//! ```
//! use report_crawler::handler::{HandlerKind, HandlerRegistry};
//! use report_crawler::{Category, SiteProfile};
//!
//! let registry = HandlerRegistry::scraped(&SiteProfile::default());
//! let handler = registry.get(Category::Strategy).unwrap();
//! assert_eq!(handler.kind(), HandlerKind::Scraped);
//! ```

mod eastmoney;
mod error;
mod scraped;
mod structured;
mod tushare;

pub use eastmoney::EastmoneyApiSource;
pub use error::{HandlerError, SourceError};
pub use scraped::ScrapedHandler;
pub use structured::{ReportSource, SourceRecord, StructuredApiHandler};
pub use tushare::TushareSource;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Category, ReportRecord};
use crate::parser::Parser;
use crate::site::SiteProfile;

/// Which listing path a handler takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Needs the category's list page fetched and passed as raw input.
    Scraped,
    /// Lists from a data source; never touches the browser for listing.
    StructuredApi,
}

/// Where a handler's listing comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    /// A fetchable list-page URL.
    ListPage(String),
    /// An opaque marker such as `tushare://strategy`; not fetchable.
    Opaque(String),
}

impl SourceReference {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ListPage(s) | Self::Opaque(s) => s,
        }
    }
}

#[async_trait]
pub trait TypeHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> Category;

    fn kind(&self) -> HandlerKind;

    fn source_reference(&self) -> SourceReference;

    /// Lists at most `limit` reports, in source order.
    ///
    /// `raw_input` is the fetched list page for scraped handlers; other
    /// handlers ignore it.
    async fn list(
        &self,
        raw_input: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReportRecord>, HandlerError>;
}

/// Category to handler mapping, fixed at construction.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Category, Arc<dyn TypeHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<_> = self
            .handlers
            .iter()
            .map(|(category, handler)| (category.as_str(), handler.name()))
            .collect();
        entries.sort_unstable();
        f.debug_map().entries(entries).finish()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scraped handlers for every category.
    #[must_use]
    pub fn scraped(site: &SiteProfile) -> Self {
        let parser = Parser::new(site.clone());
        let mut registry = Self::new();
        for category in Category::ALL {
            registry.register(Arc::new(ScrapedHandler::new(category, parser.clone())));
        }
        registry
    }

    /// Structured handlers over one source for every category.
    #[must_use]
    pub fn structured(source: Arc<dyn ReportSource>) -> Self {
        let mut registry = Self::new();
        for category in Category::ALL {
            registry.register(Arc::new(StructuredApiHandler::new(
                category,
                Arc::clone(&source),
            )));
        }
        registry
    }

    /// Registers `handler` for its category, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn TypeHandler>) {
        self.handlers.insert(handler.category(), handler);
    }

    #[must_use]
    pub fn get(&self, category: Category) -> Option<Arc<dyn TypeHandler>> {
        self.handlers.get(&category).cloned()
    }

    /// Like [`HandlerRegistry::get`], as an error for the crawler.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Unregistered`] when no handler is registered.
    pub fn require(&self, category: Category) -> Result<Arc<dyn TypeHandler>, HandlerError> {
        self.get(category)
            .ok_or(HandlerError::Unregistered(category))
    }
}
