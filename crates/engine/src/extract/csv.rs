// ABOUTME: CSV extractor: fetches delimited text and turns each data row into a record.
// ABOUTME: Cells stay string-typed; no numeric inference happens before normalization.

use csv::ReaderBuilder;
use serde_json::Value;

use crate::config::ResolvedSource;
use crate::error::ExtractionError;
use crate::fetch::{fetch, FetchOptions, RequestShaping};
use crate::rules::RawRecord;

/// Fetches a CSV document; the first row supplies field names, every later
/// row becomes one record. Ragged rows are tolerated: short rows pad with
/// null, surplus cells get positional `column_<i>` names.
pub async fn extract(
    client: &reqwest::Client,
    source: &ResolvedSource,
    opts: &FetchOptions,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let shaping = RequestShaping::from_source(source);
    let fetched = fetch(client, &source.url, &shaping, opts).await?;
    let text = fetched.text_utf8();

    let delimiter = source.extraction.delimiter.unwrap_or(',') as u8;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ExtractionError::unparsable(&source.url, "Csv", Some(anyhow::anyhow!(e))))?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let trimmed = h.trim();
            if trimmed.is_empty() {
                format!("column_{}", i)
            } else {
                trimmed.to_string()
            }
        })
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            ExtractionError::unparsable(&source.url, "Csv", Some(anyhow::anyhow!(e)))
        })?;

        let mut record = RawRecord::new();
        for (i, name) in headers.iter().enumerate() {
            record.insert(
                name.clone(),
                row.get(i)
                    .map(|cell| Value::String(cell.trim().to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        for i in headers.len()..row.len() {
            record.insert(
                format!("column_{}", i),
                Value::String(row.get(i).unwrap_or_default().trim().to_string()),
            );
        }
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpMethod, SourceType};
    use crate::rules::ExtractionRule;
    use httpmock::prelude::*;
    use serde_json::json;

    fn csv_source(url: String, rule: ExtractionRule) -> ResolvedSource {
        ResolvedSource {
            name: "csv".into(),
            enabled: true,
            kind: SourceType::Csv,
            url,
            api_key: None,
            method: HttpMethod::Get,
            extraction: rule,
        }
    }

    fn local_opts() -> FetchOptions {
        FetchOptions {
            allow_private_networks: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn parses_rows_with_headers() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/data.csv");
            then.status(200)
                .header("content-type", "text/csv")
                .body("Metric, Value\nLife expectancy,81.2\nPhysicians,2.6\n");
        });

        let source = csv_source(server.url("/data.csv"), Default::default());
        let rows = extract(&reqwest::Client::new(), &source, &local_opts())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Metric"), Some(&json!("Life expectancy")));
        assert_eq!(rows[0].get("Value"), Some(&json!("81.2")));
    }

    #[tokio::test]
    async fn custom_delimiter() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/data.csv");
            then.status(200).body("a;b\n1;2\n");
        });

        let rule = ExtractionRule {
            delimiter: Some(';'),
            ..Default::default()
        };
        let source = csv_source(server.url("/data.csv"), rule);
        let rows = extract(&reqwest::Client::new(), &source, &local_opts())
            .await
            .unwrap();
        assert_eq!(rows[0].get("a"), Some(&json!("1")));
        assert_eq!(rows[0].get("b"), Some(&json!("2")));
    }

    #[tokio::test]
    async fn ragged_rows_are_tolerated() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/data.csv");
            then.status(200).body("a,b\n1\n2,3,4\n");
        });

        let source = csv_source(server.url("/data.csv"), Default::default());
        let rows = extract(&reqwest::Client::new(), &source, &local_opts())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("b"), Some(&Value::Null));
        assert_eq!(rows[1].get("column_2"), Some(&json!("4")));
    }
}
