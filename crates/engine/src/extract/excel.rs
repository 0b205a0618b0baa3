// ABOUTME: Spreadsheet extractor: reads a fetched workbook sheet into header-keyed records.
// ABOUTME: Honors sheet selection, skip_rows, and header_row from the extraction rule.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::Value;

use crate::config::ResolvedSource;
use crate::error::ExtractionError;
use crate::fetch::{fetch, FetchOptions, RequestShaping};
use crate::rules::{records_from_rows, RawRecord, SheetRef};

/// Fetches a workbook and reads one sheet into records.
pub async fn extract(
    client: &reqwest::Client,
    source: &ResolvedSource,
    opts: &FetchOptions,
) -> Result<Vec<RawRecord>, ExtractionError> {
    let shaping = RequestShaping::from_source(source);
    let fetched = fetch(client, &source.url, &shaping, opts).await?;

    let cursor = Cursor::new(fetched.body.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| {
        ExtractionError::unparsable(&source.url, "Excel", Some(anyhow::anyhow!(e)))
    })?;

    let sheet_names = workbook.sheet_names().to_owned();
    let sheet_name = match &source.extraction.sheet {
        Some(SheetRef::Name(name)) => name.clone(),
        Some(SheetRef::Index(index)) => sheet_names.get(*index).cloned().ok_or_else(|| {
            ExtractionError::extract(
                &source.url,
                "Excel",
                Some(anyhow::anyhow!(
                    "sheet index {} out of range ({} sheets)",
                    index,
                    sheet_names.len()
                )),
            )
        })?,
        None => sheet_names.first().cloned().ok_or_else(|| {
            ExtractionError::unparsable(
                &source.url,
                "Excel",
                Some(anyhow::anyhow!("workbook has no sheets")),
            )
        })?,
    };

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        ExtractionError::extract(
            &source.url,
            "Excel",
            Some(anyhow::anyhow!("sheet \"{}\": {}", sheet_name, e)),
        )
    })?;

    let skip = source.extraction.skip_rows.unwrap_or(0);
    let rows: Vec<Vec<Value>> = range
        .rows()
        .skip(skip)
        .map(|row| row.iter().map(cell_to_value).collect())
        .collect();

    Ok(records_from_rows(
        &rows,
        source.extraction.header_row.unwrap_or(0),
    ))
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::String(s.trim().to_string()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => Value::from(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Value::from(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(e) => Value::String(format!("#ERR:{:?}", e)),
    }
}
