// ABOUTME: Scraper extractor: selector fields on the start page, or a one-level follow crawl.
// ABOUTME: Followed pages that fail to fetch are logged and skipped, never fatal to the source.

use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::config::ResolvedSource;
use crate::error::ExtractionError;
use crate::extract::html::select_fields;
use crate::fetch::{fetch, FetchOptions, RequestShaping};
use crate::rules::RawRecord;

/// Default cap on followed links when the rule does not set one.
const DEFAULT_FOLLOW_LIMIT: usize = 25;

/// Fetches the start page and applies selectors, optionally following links
/// matched by `follow` one level deep (one record per followed page).
pub async fn extract(
    client: &reqwest::Client,
    source: &ResolvedSource,
    opts: &FetchOptions,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let rule = &source.extraction;
    if rule.selectors.is_empty() {
        return Err(ExtractionError::extract(
            &source.url,
            "Scraper",
            Some(anyhow::anyhow!("scraper source needs selectors")),
        ));
    }

    let shaping = RequestShaping::from_source(source);
    let fetched = fetch(client, &source.url, &shaping, opts).await?;
    let body = fetched.text_utf8();
    let doc = Html::parse_document(&body);

    let follow = match &rule.follow {
        Some(link_selector) => link_selector,
        None => return Ok(vec![select_fields(&doc, &rule.selectors)]),
    };

    let link_sel = Selector::parse(follow).map_err(|e| {
        ExtractionError::extract(
            &source.url,
            "Scraper",
            Some(anyhow::anyhow!("invalid follow selector: {}", e)),
        )
    })?;
    let base = Url::parse(&fetched.final_url).map_err(|e| {
        ExtractionError::invalid_url(&fetched.final_url, "Scraper", Some(anyhow::anyhow!(e)))
    })?;

    let limit = rule.max_pages.unwrap_or(DEFAULT_FOLLOW_LIMIT);
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if let Ok(resolved) = base.join(href) {
                if seen.insert(resolved.to_string()) {
                    links.push(resolved);
                }
            }
        }
        if links.len() >= limit {
            break;
        }
    }

    tracing::debug!(url = %source.url, links = links.len(), "following links");

    let mut records = Vec::new();
    for link in links {
        match fetch(client, link.as_str(), &shaping, opts).await {
            Ok(page) => {
                let page_doc = Html::parse_document(&page.text_utf8());
                let mut record = select_fields(&page_doc, &rule.selectors);
                record.insert("page_url".into(), Value::String(link.into()));
                records.push(record);
            }
            Err(e) => {
                tracing::warn!(url = %link, error = %e, "followed page failed, skipping");
            }
        }
    }

    Ok(records)
}
