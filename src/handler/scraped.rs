//! Handler for categories listed on the site's own HTML pages.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::error::HandlerError;
use super::{HandlerKind, SourceReference, TypeHandler};
use crate::model::{Category, ReportRecord};
use crate::parser::Parser;

/// Parses a list page the crawler fetched through the browser.
#[derive(Debug, Clone)]
pub struct ScrapedHandler {
    category: Category,
    parser: Parser,
}

impl ScrapedHandler {
    #[must_use]
    pub fn new(category: Category, parser: Parser) -> Self {
        Self { category, parser }
    }
}

#[async_trait]
impl TypeHandler for ScrapedHandler {
    fn name(&self) -> &'static str {
        "scraped"
    }

    fn category(&self) -> Category {
        self.category
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Scraped
    }

    fn source_reference(&self) -> SourceReference {
        SourceReference::ListPage(self.parser.site().list_url(self.category))
    }

    #[instrument(skip(self, raw_input), fields(category = %self.category))]
    async fn list(
        &self,
        raw_input: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ReportRecord>, HandlerError> {
        let html = raw_input.ok_or(HandlerError::MissingInput {
            handler: self.name(),
        })?;
        let extraction = self.parser.extract_list(html, self.category, limit);
        debug!(
            heuristic = extraction.heuristic.unwrap_or("none"),
            count = extraction.records.len(),
            "list page parsed"
        );
        Ok(extraction.records)
    }
}
