//! Deterministic artifact naming and on-disk layout.
//!
//! Filenames combine a readable fragment (title, publication date) with a
//! short SHA-256 digest of the source URL, so the same URL always maps to
//! the same name and distinct URLs do not collide.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::model::{Artifact, Category, ReportRecord};

/// Upper bound for a generated filename, in bytes.
pub const MAX_FILENAME_BYTES: usize = 200;

/// Hex characters of the URL digest kept in the filename.
const HASH_PREFIX_LEN: usize = 12;

const PDF_EXTENSION: &str = ".pdf";

/// Returns the deterministic filename for an artifact.
///
/// Pattern: `{title}_{YYYYMMDD}_{hash}.pdf`, with the date omitted when the
/// report has none and the title falling back to the URL's last segment.
#[must_use]
pub fn artifact_filename(source_url: &str, report: &ReportRecord) -> String {
    let hash = url_digest(source_url);
    let date: String = report
        .published_date
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    let mut fragment = sanitize_filename_component(&report.title);
    if fragment.is_empty() {
        fragment = fragment_from_url(source_url);
    }

    let mut suffix = String::new();
    if !date.is_empty() {
        suffix.push('_');
        suffix.push_str(&date);
    }
    suffix.push('_');
    suffix.push_str(&hash);
    suffix.push_str(PDF_EXTENSION);

    let budget = MAX_FILENAME_BYTES.saturating_sub(suffix.len());
    let fragment = truncate_on_char_boundary(&fragment, budget);
    if fragment.is_empty() {
        // Drop the leading separator when nothing readable is left.
        return suffix.trim_start_matches('_').to_string();
    }
    format!("{fragment}{suffix}")
}

/// First [`HASH_PREFIX_LEN`] hex characters of SHA-256(`source_url`).
#[must_use]
pub fn url_digest(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    let mut hex = String::with_capacity(HASH_PREFIX_LEN);
    for byte in digest.iter().take(HASH_PREFIX_LEN.div_ceil(2)) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(HASH_PREFIX_LEN);
    hex
}

/// Replaces characters that are illegal in file names and collapses runs of
/// whitespace and separators into a single `_`.
#[must_use]
pub fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

fn fragment_from_url(source_url: &str) -> String {
    let Some(last) = Url::parse(source_url)
        .ok()
        .and_then(|u| u.path_segments()?.next_back().map(str::to_string))
        .filter(|s| !s.is_empty())
    else {
        return String::new();
    };
    let decoded = urlencoding::decode(&last).map_or_else(|_| last.clone(), |d| d.into_owned());
    let stem = decoded
        .strip_suffix(PDF_EXTENSION)
        .or_else(|| decoded.strip_suffix(".PDF"))
        .unwrap_or(&decoded);
    sanitize_filename_component(stem)
}

fn truncate_on_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].trim_end_matches('_')
}

/// Output root with one sub-directory per category.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn directory_for(&self, category: Category) -> PathBuf {
        self.root.join(category.directory_name())
    }

    /// Full destination path for `artifact`.
    #[must_use]
    pub fn destination_for(&self, artifact: &Artifact) -> PathBuf {
        self.directory_for(artifact.report.category)
            .join(&artifact.filename)
    }

    /// Creates the category directory if missing and returns it.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the directory cannot be created.
    pub async fn ensure_directory(&self, category: Category) -> std::io::Result<PathBuf> {
        let dir = self.directory_for(category);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(path = %dir.display(), "storage directory ready");
        Ok(dir)
    }
}
