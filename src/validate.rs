//! Binary content validation for acquired artifacts.
//!
//! Every tier of the downloader hands its bytes to [`ContentValidator`]
//! before they are accepted. A rejection is classified so logs can tell an
//! anti-bot interstitial apart from a truncated or foreign payload; the
//! classification never changes the outcome.

use serde::Serialize;

/// Leading bytes of every PDF file.
pub const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Smallest payload accepted as a plausible report.
pub const MIN_PDF_BYTES: usize = 1024;

/// How many leading bytes are scanned for markup.
const MARKUP_PROBE_LEN: usize = 512;

const MARKUP_MARKERS: &[&[u8]] = &[
    b"<script",
    b"<html",
    b"<!doctype",
    b"<head",
    b"function",
];

/// Why a payload was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Payload is script or markup, typically a challenge page.
    AntiBotInterstitial,
    /// Payload does not start with the PDF signature.
    MissingSignature,
    /// Payload starts like a PDF but is implausibly small.
    TooShort,
}

impl Rejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AntiBotInterstitial => "anti_bot_interstitial",
            Self::MissingSignature => "missing_signature",
            Self::TooShort => "too_short",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts only well-formed PDF payloads.
#[derive(Debug, Clone, Copy)]
pub struct ContentValidator {
    min_bytes: usize,
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self {
            min_bytes: MIN_PDF_BYTES,
        }
    }
}

impl ContentValidator {
    #[must_use]
    pub fn new(min_bytes: usize) -> Self {
        Self {
            min_bytes: min_bytes.max(PDF_SIGNATURE.len()),
        }
    }

    #[must_use]
    pub fn min_bytes(&self) -> usize {
        self.min_bytes
    }

    /// Returns `true` if `bytes` is an acceptable PDF.
    #[must_use]
    pub fn validate(&self, bytes: &[u8]) -> bool {
        self.inspect(bytes).is_ok()
    }

    /// Validates `bytes` and classifies the rejection.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] class when the payload is not accepted.
    pub fn inspect(&self, bytes: &[u8]) -> Result<(), Rejection> {
        if !bytes.starts_with(PDF_SIGNATURE) {
            if looks_like_markup(bytes) {
                return Err(Rejection::AntiBotInterstitial);
            }
            return Err(Rejection::MissingSignature);
        }
        if bytes.len() < self.min_bytes {
            return Err(Rejection::TooShort);
        }
        Ok(())
    }
}

/// Checks the leading bytes for script or markup markers.
///
/// Used both for classification and by streaming readers to abort early.
#[must_use]
pub fn looks_like_markup(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(MARKUP_PROBE_LEN)];
    let lowered = window.to_ascii_lowercase();
    MARKUP_MARKERS
        .iter()
        .any(|marker| contains_subslice(&lowered, marker))
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
