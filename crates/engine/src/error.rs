// ABOUTME: Error types for the collection engine: ConfigError, ExtractionError, CapacityError.
// ABOUTME: ExtractionError carries a code, the failing URL, an operation tag, and an optional cause.

use std::fmt;
use std::path::PathBuf;

/// Structural problems found while resolving a configuration document.
///
/// Fatal to the configuration they originate from; sibling configurations in
/// a multi-configuration run are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("source {source_name}: referenced config file not found: {reference}")]
    MissingReference {
        source_name: String,
        reference: PathBuf,
    },

    #[error("source {source_name}: no url after resolving its definition")]
    MissingUrl { source_name: String },

    #[error("source {source_name}: unknown source type \"{kind}\"")]
    UnknownSourceType { source_name: String, kind: String },

    #[error("source {source_name}: {message}")]
    InvalidSource { source_name: String, message: String },

    #[error("configuration {path}: {message}")]
    InvalidMetadata { path: PathBuf, message: String },
}

/// Categories of per-source extraction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorCode {
    InvalidUrl,
    Fetch,
    Timeout,
    Ssrf,
    MissingPath,
    Unparsable,
    Extract,
}

impl fmt::Display for ExtractionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionErrorCode::InvalidUrl => "invalid URL",
            ExtractionErrorCode::Fetch => "fetch error",
            ExtractionErrorCode::Timeout => "timeout",
            ExtractionErrorCode::Ssrf => "blocked private address",
            ExtractionErrorCode::MissingPath => "missing data path",
            ExtractionErrorCode::Unparsable => "unparsable content",
            ExtractionErrorCode::Extract => "extraction error",
        };
        write!(f, "{}", s)
    }
}

/// A source's fetch or extraction failed.
///
/// Isolated to that source: the dispatcher records the reason and proceeds to
/// the next source in the configuration.
#[derive(Debug, thiserror::Error)]
pub struct ExtractionError {
    pub code: ExtractionErrorCode,
    pub url: String,
    pub op: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op, self.url, self.code)?;
        if let Some(ref src) = self.source {
            write!(f, ": {}", src)?;
        }
        Ok(())
    }
}

impl ExtractionError {
    fn new(
        code: ExtractionErrorCode,
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self {
            code,
            url: url.into(),
            op: op.into(),
            source,
        }
    }

    /// Create an InvalidUrl error.
    pub fn invalid_url(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::InvalidUrl, url, op, source)
    }

    /// Create a Fetch error.
    pub fn fetch(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::Fetch, url, op, source)
    }

    /// Create a Timeout error.
    pub fn timeout(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::Timeout, url, op, source)
    }

    /// Create an Ssrf error.
    pub fn ssrf(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::Ssrf, url, op, source)
    }

    /// Create a MissingPath error.
    pub fn missing_path(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::MissingPath, url, op, source)
    }

    /// Create an Unparsable error.
    pub fn unparsable(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::Unparsable, url, op, source)
    }

    /// Create a generic Extract error.
    pub fn extract(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ExtractionErrorCode::Extract, url, op, source)
    }

    /// Returns true if this is a Timeout error.
    pub fn is_timeout(&self) -> bool {
        self.code == ExtractionErrorCode::Timeout
    }

    /// Returns true if this is a Fetch error.
    pub fn is_fetch(&self) -> bool {
        self.code == ExtractionErrorCode::Fetch
    }

    /// Returns true if this is a MissingPath error.
    pub fn is_missing_path(&self) -> bool {
        self.code == ExtractionErrorCode::MissingPath
    }

    /// Returns true if this is an Unparsable error.
    pub fn is_unparsable(&self) -> bool {
        self.code == ExtractionErrorCode::Unparsable
    }

    /// Returns true if this is an Ssrf error.
    pub fn is_ssrf(&self) -> bool {
        self.code == ExtractionErrorCode::Ssrf
    }
}

/// A partition write would exceed the size ceiling.
///
/// Isolated to the partition: the offending write is rejected in full and the
/// partition's prior contents are left unchanged.
#[derive(Debug, thiserror::Error)]
#[error(
    "partition {topic}/{date}/{country_code} would grow to {size} bytes, over the {ceiling} byte ceiling"
)]
pub struct CapacityError {
    pub topic: String,
    pub country_code: String,
    pub date: String,
    /// The would-be size of the partition after the write.
    pub size: u64,
    pub ceiling: u64,
}
