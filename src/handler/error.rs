//! Error types for type handlers and structured data sources.

use thiserror::Error;

use crate::download::{FailureType, classify_http_status};
use crate::model::Category;

/// Failure of a structured data source call.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("{source_name} quota exceeded: {message}")]
    RateLimited {
        source_name: &'static str,
        message: String,
    },

    #[error("{source_name} API error {code}: {message}")]
    Api {
        source_name: &'static str,
        code: i64,
        message: String,
    },

    #[error("{0} requires an API token")]
    MissingToken(&'static str),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl SourceError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Retry classification, shared with the download retry loop.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::RateLimited { .. } => FailureType::RateLimited,
            Self::Network { .. } => FailureType::Transient,
            Self::HttpStatus { status, .. } => classify_http_status(*status),
            Self::Decode { .. } | Self::Api { .. } | Self::Client(_) => FailureType::Permanent,
            Self::MissingToken(_) => FailureType::NeedsAuth,
        }
    }
}

/// Failure to list a category's reports.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler '{handler}' needs a fetched list page")]
    MissingInput { handler: &'static str },

    #[error("no handler registered for category '{0}'")]
    Unregistered(Category),

    #[error("{category} source failed: {source}")]
    Source {
        category: Category,
        #[source]
        source: SourceError,
    },
}
