// ABOUTME: PDF extractor: fetches a document and extracts per-page text records.
// ABOUTME: With a pages list, one record per selected page; otherwise one record for the whole text.

use serde_json::Value;

use crate::config::ResolvedSource;
use crate::error::ExtractionError;
use crate::fetch::{fetch, FetchOptions, RequestShaping};
use crate::rules::RawRecord;

/// Fetches a PDF and extracts its text layer.
///
/// Records carry a `content` field; page-scoped records also carry the
/// zero-based `page` index. An out-of-range page index is logged and skipped,
/// it does not fail the source.
pub async fn extract(
    client: &reqwest::Client,
    source: &ResolvedSource,
    opts: &FetchOptions,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let shaping = RequestShaping::from_source(source);
    let fetched = fetch(client, &source.url, &shaping, opts).await?;

    let pages = pdf_extract::extract_text_from_mem_by_pages(&fetched.body).map_err(|e| {
        ExtractionError::unparsable(&source.url, "Pdf", Some(anyhow::anyhow!(e)))
    })?;

    let mut records = Vec::new();
    match &source.extraction.pages {
        Some(wanted) => {
            for &page in wanted {
                match pages.get(page) {
                    Some(text) => {
                        let mut record = RawRecord::new();
                        record.insert("page".into(), Value::from(page as u64));
                        record.insert("content".into(), Value::String(text.trim().to_string()));
                        records.push(record);
                    }
                    None => {
                        tracing::warn!(
                            page,
                            available = pages.len(),
                            url = %source.url,
                            "requested page out of range"
                        );
                    }
                }
            }
        }
        None => {
            let mut record = RawRecord::new();
            record.insert(
                "content".into(),
                Value::String(pages.join("\n").trim().to_string()),
            );
            records.push(record);
        }
    }

    Ok(records)
}
