// ABOUTME: API extractor: shaped GET/POST request, JSON parse, data_path row extraction.
// ABOUTME: A missing data_path is surfaced as an error, never papered over with the full response.

use crate::config::ResolvedSource;
use crate::error::ExtractionError;
use crate::fetch::{fetch, FetchOptions, RequestShaping};
use crate::rules::{navigate_path, rows_from_response, rows_from_sequence, RawRecord};

/// Fetches a structured API response and extracts its rows.
pub async fn extract(
    client: &reqwest::Client,
    source: &ResolvedSource,
    opts: &FetchOptions,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let shaping = RequestShaping::from_source(source);
    let fetched = fetch(client, &source.url, &shaping, opts).await?;

    let value: serde_json::Value = serde_json::from_slice(&fetched.body).map_err(|e| {
        ExtractionError::unparsable(&source.url, "Api", Some(anyhow::anyhow!(e)))
    })?;

    match source.extraction.data_path.as_deref() {
        Some(path) if !path.is_empty() => {
            let nested = navigate_path(&value, path, &source.url)?;
            rows_from_sequence(nested, &source.url)
        }
        _ => rows_from_response(&value, &source.url),
    }
}
