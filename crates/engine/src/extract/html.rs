// ABOUTME: HTML extractor: named selector fields and table extraction over a parsed DOM.
// ABOUTME: A selector matching nothing yields a null field, never an error.

use scraper::{Html, Selector};
use serde_json::Value;

use crate::config::ResolvedSource;
use crate::error::ExtractionError;
use crate::fetch::{fetch, FetchOptions, RequestShaping};
use crate::rules::{records_from_rows, NamedSelector, RawRecord};

/// Fetches an HTML page and applies the source's selectors and/or table rule.
pub async fn extract(
    client: &reqwest::Client,
    source: &ResolvedSource,
    opts: &FetchOptions,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let rule = &source.extraction;
    if !rule.has_locators() {
        return Err(ExtractionError::extract(
            &source.url,
            "Html",
            Some(anyhow::anyhow!(
                "extraction block needs selectors or a table_selector"
            )),
        ));
    }

    let shaping = RequestShaping::from_source(source);
    let fetched = fetch(client, &source.url, &shaping, opts).await?;
    let body = fetched.text_utf8();
    let doc = Html::parse_document(&body);

    let mut records = Vec::new();
    if !rule.selectors.is_empty() {
        records.push(select_fields(&doc, &rule.selectors));
    }
    if let Some(ref table_selector) = rule.table_selector {
        records.extend(extract_table(
            &doc,
            table_selector,
            rule.header_row.unwrap_or(0),
            &source.url,
        )?);
    }
    Ok(records)
}

/// Applies named selectors to a document, producing one record.
///
/// Text is whitespace-normalized; `attr` extracts an attribute value instead;
/// `multiple` collects every match as a list. No match means a null field.
pub(crate) fn select_fields(doc: &Html, selectors: &[NamedSelector]) -> RawRecord {
    let mut record = RawRecord::new();
    for named in selectors {
        record.insert(named.name.clone(), select_value(doc, named));
    }
    record
}

fn select_value(doc: &Html, named: &NamedSelector) -> Value {
    let selector = match Selector::parse(&named.selector) {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!(selector = %named.selector, "invalid selector, field left null");
            return Value::Null;
        }
    };

    let values: Vec<String> = doc
        .select(&selector)
        .filter_map(|el| {
            let text = match &named.attr {
                Some(attr) => el.value().attr(attr).map(|v| v.trim().to_string()),
                None => Some(normalize_whitespace(&el.text().collect::<String>())),
            };
            text.filter(|t| !t.is_empty())
        })
        .collect();

    if values.is_empty() {
        Value::Null
    } else if named.multiple {
        Value::Array(values.into_iter().map(Value::String).collect())
    } else {
        Value::String(values.into_iter().next().unwrap())
    }
}

/// Extracts the first table matching the selector into records.
///
/// The `header_row` row (zero-based) supplies field names; every later row
/// becomes one record. An absent table yields no records rather than an
/// error, matching field-selector semantics.
pub(crate) fn extract_table(
    doc: &Html,
    table_selector: &str,
    header_row: usize,
    url: &str,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let selector = Selector::parse(table_selector).map_err(|e| {
        ExtractionError::extract(
            url,
            "HtmlTable",
            Some(anyhow::anyhow!("invalid table_selector: {}", e)),
        )
    })?;

    let table = match doc.select(&selector).next() {
        Some(t) => t,
        None => {
            tracing::warn!(selector = %table_selector, "table not found");
            return Ok(Vec::new());
        }
    };

    let row_selector = Selector::parse("tr").expect("static selector");
    let cell_selector = Selector::parse("td, th").expect("static selector");

    let rows: Vec<Vec<Value>> = table
        .select(&row_selector)
        .filter_map(|tr| {
            let cells: Vec<Value> = tr
                .select(&cell_selector)
                .map(|cell| {
                    Value::String(normalize_whitespace(&cell.text().collect::<String>()))
                })
                .collect();
            if cells.is_empty() {
                None
            } else {
                Some(cells)
            }
        })
        .collect();

    Ok(records_from_rows(&rows, header_row))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
