// ABOUTME: Topic/country configuration documents, source definitions, and the resolver.
// ABOUTME: External config references are loaded and merged exactly one level deep.

//! Configuration loading and resolution.
//!
//! A configuration document describes one topic/country pair and an ordered
//! list of source definitions. A definition may delegate to an external file
//! via its `config` key; the external file's `extraction`, `url`, `api_key`,
//! and `method` take precedence over the local fields, which act as defaults.
//! Resolution is recursive to exactly one level: an external file's own
//! `config` key is ignored, so reference cycles are impossible by
//! construction rather than by cycle detection.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::ExtractionRule;

/// Descriptive metadata of a topic/country configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub topic: String,
    pub country_code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub update_frequency: Option<String>,
}

/// A source definition exactly as written in the document.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDocument {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub extraction: Option<ExtractionRule>,
}

fn default_enabled() -> bool {
    true
}

/// The shape of an externally referenced definition file.
///
/// Any `config` key inside it is ignored; see the module docs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalSourceConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub extraction: Option<ExtractionRule>,
}

/// A whole configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigDocument {
    pub metadata: Metadata,
    #[serde(default)]
    pub sources: Vec<SourceDocument>,
}

/// The six supported source kinds. Closed enumeration: anything else is a
/// configuration error before any network activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Html,
    Pdf,
    Excel,
    Csv,
    Api,
    Scraper,
}

impl SourceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Some(SourceType::Html),
            "pdf" => Some(SourceType::Pdf),
            "excel" => Some(SourceType::Excel),
            "csv" => Some(SourceType::Csv),
            "api" => Some(SourceType::Api),
            "scraper" => Some(SourceType::Scraper),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Html => "html",
            SourceType::Pdf => "pdf",
            SourceType::Excel => "excel",
            SourceType::Csv => "csv",
            SourceType::Api => "api",
            SourceType::Scraper => "scraper",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound HTTP method of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            _ => None,
        }
    }
}

/// A fully resolved, immutable source definition, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub name: String,
    pub enabled: bool,
    pub kind: SourceType,
    /// Non-empty for every enabled source; disabled sources are never
    /// dispatched and may leave it empty.
    pub url: String,
    pub api_key: Option<String>,
    pub method: HttpMethod,
    pub extraction: ExtractionRule,
}

/// A fully resolved configuration: metadata plus its sources, in document
/// order. Immutable during a run.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub path: PathBuf,
    pub metadata: Metadata,
    pub sources: Vec<ResolvedSource>,
}

/// Loads and fully resolves a configuration document.
///
/// Every `config`-referencing source definition is expanded by loading and
/// merging the referenced file. Fails with [`ConfigError`] when the document
/// is unparsable, a referenced file is missing, or an enabled source ends up
/// without a url after the merge.
pub fn resolve_config(path: &Path) -> Result<ResolvedConfig, ConfigError> {
    let document = load_document(path)?;
    validate_metadata(path, &document.metadata)?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut sources = Vec::with_capacity(document.sources.len());
    for source in document.sources {
        sources.push(resolve_source(source, base_dir)?);
    }

    tracing::debug!(
        path = %path.display(),
        topic = %document.metadata.topic,
        country = %document.metadata.country_code,
        sources = sources.len(),
        "configuration resolved"
    );

    Ok(ResolvedConfig {
        path: path.to_path_buf(),
        metadata: document.metadata,
        sources,
    })
}

fn load_document(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn validate_metadata(path: &Path, metadata: &Metadata) -> Result<(), ConfigError> {
    if metadata.topic.trim().is_empty() {
        return Err(ConfigError::InvalidMetadata {
            path: path.to_path_buf(),
            message: "metadata.topic is empty".into(),
        });
    }
    let code = metadata.country_code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::InvalidMetadata {
            path: path.to_path_buf(),
            message: format!(
                "metadata.country_code \"{}\" is not an ISO 3166-1 alpha-2 code",
                metadata.country_code
            ),
        });
    }
    Ok(())
}

/// Two-stage construction: parse the local definition, parse the referenced
/// definition if present, merge with fixed precedence, then validate.
fn resolve_source(local: SourceDocument, base_dir: &Path) -> Result<ResolvedSource, ConfigError> {
    let kind = SourceType::parse(&local.kind).ok_or_else(|| ConfigError::UnknownSourceType {
        source_name: local.name.clone(),
        kind: local.kind.clone(),
    })?;

    let external = match &local.config {
        Some(reference) => Some(load_external(&local.name, base_dir, reference)?),
        None => None,
    };
    let external = external.unwrap_or_default();

    // The external definition wins; local fields are the defaults.
    let url = external.url.or(local.url).unwrap_or_default();
    let api_key = external.api_key.or(local.api_key);
    let method_str = external.method.or(local.method);
    let extraction = external
        .extraction
        .or(local.extraction)
        .unwrap_or_default();

    let method = match method_str {
        Some(ref s) => HttpMethod::parse(s).ok_or_else(|| ConfigError::InvalidSource {
            source_name: local.name.clone(),
            message: format!("unsupported HTTP method \"{}\"", s),
        })?,
        None => HttpMethod::default(),
    };

    if local.enabled && url.trim().is_empty() {
        return Err(ConfigError::MissingUrl {
            source_name: local.name,
        });
    }

    Ok(ResolvedSource {
        name: local.name,
        enabled: local.enabled,
        kind,
        url,
        api_key,
        method,
        extraction,
    })
}

/// Loads an externally referenced definition, relative to the primary
/// document's directory unless the reference is absolute. `.json` files are
/// parsed as JSON, everything else as YAML.
fn load_external(
    source_name: &str,
    base_dir: &Path,
    reference: &str,
) -> Result<ExternalSourceConfig, ConfigError> {
    let ref_path = Path::new(reference);
    let path = if ref_path.is_absolute() {
        ref_path.to_path_buf()
    } else {
        base_dir.join(ref_path)
    };

    if !path.exists() {
        return Err(ConfigError::MissingReference {
            source_name: source_name.to_string(),
            reference: path,
        });
    }

    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let parsed = if is_json {
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?
    };

    Ok(parsed)
}
