// ABOUTME: Extraction rule model and interpreter: filters, column projection, data-path navigation.
// ABOUTME: Filters always run before projection; reversing the order changes results.

//! The declarative extraction rule and its interpreter primitives.
//!
//! An [`ExtractionRule`] describes how fetched content becomes raw records:
//! named selectors, table location, nested-path navigation for structured
//! responses, outbound request shaping, filter predicates, and an ordered
//! column projection. The interpreter applies filters first and projection
//! second — a filtered-on column may legally be absent from the projection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtractionError;

/// A flat extractor-output row: field name to scalar or list value.
///
/// Insertion order is preserved so projection order survives to the writer.
pub type RawRecord = serde_json::Map<String, Value>;

/// One named locator: a CSS selector mapped to an output field name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedSelector {
    pub name: String,
    pub selector: String,
    /// Extract this attribute instead of the node text.
    #[serde(default)]
    pub attr: Option<String>,
    /// Collect every match instead of the first.
    #[serde(default)]
    pub multiple: bool,
}

/// Worksheet reference: by zero-based index or by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetRef {
    Index(usize),
    Name(String),
}

/// Comparison operator of a filter predicate. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterOp {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "contains")]
    Contains,
}

/// One filter predicate over a record column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    #[serde(default)]
    pub operator: FilterOp,
    pub value: Value,
}

/// The full extraction block of a source definition. All parts optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRule {
    /// Named selector extraction (html and scraper sources).
    pub selectors: Vec<NamedSelector>,
    /// CSS selector locating a table whose rows become records.
    pub table_selector: Option<String>,
    /// Zero-based row index supplying field names for subsequent rows.
    pub header_row: Option<usize>,
    /// Dot-delimited path into a structured response; a numeric segment
    /// indexes into a sequence.
    pub data_path: Option<String>,
    /// Extra request headers (api and scraper sources).
    pub headers: HashMap<String, String>,
    /// Query parameters; values are stringified when the request is built.
    pub params: HashMap<String, Value>,
    /// JSON body for POST requests.
    pub payload: Option<Value>,
    /// Ordered allow-list projection; absent fields become null.
    pub columns: Option<Vec<String>>,
    /// Ordered predicates; a record is retained only if all pass.
    pub filters: Vec<Filter>,
    /// Specific zero-based pages to extract (pdf sources).
    pub pages: Option<Vec<usize>>,
    /// Worksheet to read (excel sources).
    pub sheet: Option<SheetRef>,
    /// Rows discarded before the header row (excel sources).
    pub skip_rows: Option<usize>,
    /// Field delimiter override (csv sources).
    pub delimiter: Option<char>,
    /// Link selector for a one-level follow crawl (scraper sources).
    pub follow: Option<String>,
    /// Cap on followed links.
    pub max_pages: Option<usize>,
}

impl ExtractionRule {
    /// True when the rule says nothing about locating content.
    pub fn has_locators(&self) -> bool {
        !self.selectors.is_empty() || self.table_selector.is_some()
    }
}

/// Applies filters then projection to a batch of extracted records.
///
/// The order is fixed: a record is filtered on its full field set, and only
/// the survivors are projected down to `columns`.
pub fn apply_rule(records: Vec<RawRecord>, rule: &ExtractionRule) -> Vec<RawRecord> {
    let filtered: Vec<RawRecord> = if rule.filters.is_empty() {
        records
    } else {
        records
            .into_iter()
            .filter(|r| passes_filters(r, &rule.filters))
            .collect()
    };

    match &rule.columns {
        Some(cols) => filtered.into_iter().map(|r| project(&r, cols)).collect(),
        None => filtered,
    }
}

/// True when the record satisfies every predicate in declared order.
pub fn passes_filters(record: &RawRecord, filters: &[Filter]) -> bool {
    filters.iter().all(|f| {
        let pass = eval_filter(record.get(&f.column), f);
        if !pass {
            tracing::debug!(column = %f.column, operator = ?f.operator, "record excluded by filter");
        }
        pass
    })
}

/// Evaluates one predicate. A missing column or an un-evaluable comparison
/// fails the predicate (the record is excluded) rather than raising.
fn eval_filter(value: Option<&Value>, filter: &Filter) -> bool {
    let value = match value {
        Some(v) => v,
        None => return false,
    };

    match filter.operator {
        FilterOp::Eq => values_equal(value, &filter.value),
        FilterOp::Ne => !values_equal(value, &filter.value),
        FilterOp::Gt => match (as_number(value), as_number(&filter.value)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        FilterOp::Lt => match (as_number(value), as_number(&filter.value)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        FilterOp::Contains => string_form(value).contains(&string_form(&filter.value)),
    }
}

/// Scalar equality with numeric coercion: `"3"` equals `3`.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => string_form(a) == string_form(b),
        _ => false,
    }
}

/// Numeric view of a value: a JSON number, or a string that parses as one.
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// The string form used for `contains` and string comparisons.
pub fn string_form(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Retains only the listed fields, in declared order. Absent fields become
/// null rather than being omitted, so row shape stays uniform per source.
pub fn project(record: &RawRecord, columns: &[String]) -> RawRecord {
    let mut out = RawRecord::new();
    for col in columns {
        out.insert(
            col.clone(),
            record.get(col).cloned().unwrap_or(Value::Null),
        );
    }
    out
}

/// Descends a structured response along a dot-delimited path.
///
/// A numeric segment indexes into a sequence. A segment that cannot be
/// resolved fails with a MissingPath error: a vanished path is ambiguous
/// between an upstream schema change and a misconfiguration, so it is
/// surfaced rather than guessed around.
pub fn navigate_path<'a>(
    root: &'a Value,
    path: &str,
    url: &str,
) -> Result<&'a Value, ExtractionError> {
    let mut current = root;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            ExtractionError::missing_path(
                url,
                "Navigate",
                Some(anyhow::anyhow!(
                    "segment \"{}\" of data_path \"{}\" not found",
                    segment,
                    path
                )),
            )
        })?;
    }
    Ok(current)
}

/// Converts a navigated value into records. The value must be a sequence of
/// mappings; each mapping becomes one record.
pub fn rows_from_sequence(value: &Value, url: &str) -> Result<Vec<RawRecord>, ExtractionError> {
    let items = value.as_array().ok_or_else(|| {
        ExtractionError::unparsable(
            url,
            "Navigate",
            Some(anyhow::anyhow!("data_path value is not a sequence")),
        )
    })?;

    items
        .iter()
        .map(|item| {
            item.as_object().cloned().ok_or_else(|| {
                ExtractionError::unparsable(
                    url,
                    "Navigate",
                    Some(anyhow::anyhow!("data_path sequence holds a non-mapping item")),
                )
            })
        })
        .collect()
}

/// Converts a whole structured response (no data_path) into records: an array
/// of mappings becomes many records, a single mapping becomes one.
pub fn rows_from_response(value: &Value, url: &str) -> Result<Vec<RawRecord>, ExtractionError> {
    match value {
        Value::Array(_) => rows_from_sequence(value, url),
        Value::Object(map) => Ok(vec![map.clone()]),
        _ => Err(ExtractionError::unparsable(
            url,
            "Navigate",
            Some(anyhow::anyhow!("response is neither a mapping nor a sequence")),
        )),
    }
}

/// Builds records from raw table rows given the header row index.
///
/// Header names are trimmed; an empty header cell gets a positional
/// `column_<i>` name. Short data rows pad missing trailing cells with null;
/// surplus cells beyond the header also get positional names.
pub fn records_from_rows(rows: &[Vec<Value>], header_row: usize) -> Vec<RawRecord> {
    if rows.len() <= header_row {
        tracing::warn!(
            header_row,
            rows = rows.len(),
            "header row index beyond available rows"
        );
        return Vec::new();
    }

    let headers: Vec<String> = rows[header_row]
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let name = crate::normalize::canonical_field_name(&string_form(cell));
            if name.is_empty() {
                format!("column_{}", i)
            } else {
                name
            }
        })
        .collect();

    rows[header_row + 1..]
        .iter()
        .map(|row| {
            let mut record = RawRecord::new();
            for (i, name) in headers.iter().enumerate() {
                record.insert(name.clone(), row.get(i).cloned().unwrap_or(Value::Null));
            }
            for (i, cell) in row.iter().enumerate().skip(headers.len()) {
                record.insert(format!("column_{}", i), cell.clone());
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> RawRecord {
        let mut r = RawRecord::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[test]
    fn filter_ops_compare_numbers_and_strings() {
        let r = record(&[("count", json!("12")), ("status", json!("active"))]);

        let gt = Filter {
            column: "count".into(),
            operator: FilterOp::Gt,
            value: json!(10),
        };
        assert!(passes_filters(&r, &[gt]));

        let lt = Filter {
            column: "count".into(),
            operator: FilterOp::Lt,
            value: json!(10),
        };
        assert!(!passes_filters(&r, &[lt]));

        let eq = Filter {
            column: "status".into(),
            operator: FilterOp::Eq,
            value: json!("active"),
        };
        assert!(passes_filters(&r, &[eq]));

        let contains = Filter {
            column: "status".into(),
            operator: FilterOp::Contains,
            value: json!("act"),
        };
        assert!(passes_filters(&r, &[contains]));
    }

    #[test]
    fn type_mismatch_excludes_record_instead_of_raising() {
        let r = record(&[("name", json!("alpha"))]);
        let gt = Filter {
            column: "name".into(),
            operator: FilterOp::Gt,
            value: json!(5),
        };
        assert!(!passes_filters(&r, &[gt]));
    }

    #[test]
    fn missing_column_fails_the_predicate() {
        let r = record(&[("a", json!(1))]);
        let ne = Filter {
            column: "missing".into(),
            operator: FilterOp::Ne,
            value: json!("x"),
        };
        assert!(!passes_filters(&r, &[ne]));
    }

    #[test]
    fn numeric_string_equality_coerces() {
        let r = record(&[("year", json!("2025"))]);
        let eq = Filter {
            column: "year".into(),
            operator: FilterOp::Eq,
            value: json!(2025),
        };
        assert!(passes_filters(&r, &[eq]));
    }

    #[test]
    fn filters_run_before_projection() {
        // The filtered-on column is absent from the projection list; the
        // filter must still see it.
        let records = vec![
            record(&[("a", json!(1)), ("b", json!(2))]),
            record(&[("a", json!(3)), ("b", json!(9))]),
        ];
        let rule = ExtractionRule {
            columns: Some(vec!["a".into()]),
            filters: vec![Filter {
                column: "b".into(),
                operator: FilterOp::Lt,
                value: json!(5),
            }],
            ..Default::default()
        };

        let out = apply_rule(records.clone(), &rule);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("a"), Some(&json!(1)));
        assert!(out[0].get("b").is_none());

        // Projecting first would have dropped `b` and excluded everything.
        let projected_first: Vec<RawRecord> = records
            .into_iter()
            .map(|r| project(&r, &["a".into()]))
            .filter(|r| passes_filters(r, &rule.filters))
            .collect();
        assert!(projected_first.is_empty());
    }

    #[test]
    fn projection_keeps_declared_order_and_nulls_absent_fields() {
        let r = record(&[("b", json!(2)), ("a", json!(1))]);
        let out = project(&r, &["a".into(), "missing".into(), "b".into()]);
        let keys: Vec<&String> = out.keys().collect();
        assert_eq!(keys, ["a", "missing", "b"]);
        assert_eq!(out.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn navigate_path_descends_objects_and_arrays() {
        let doc = json!({"response": {"events": [{"title": "A"}, {"title": "B"}]}});
        let v = navigate_path(&doc, "response.events", "http://x").unwrap();
        let rows = rows_from_sequence(v, "http://x").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("title"), Some(&json!("A")));
        assert_eq!(rows[1].get("title"), Some(&json!("B")));

        let first = navigate_path(&doc, "response.events.1.title", "http://x").unwrap();
        assert_eq!(first, &json!("B"));
    }

    #[test]
    fn navigate_missing_path_errors() {
        let doc = json!({"events": []});
        let err = navigate_path(&doc, "missing", "http://x").unwrap_err();
        assert!(err.is_missing_path());
    }

    #[test]
    fn rows_from_sequence_rejects_non_mappings() {
        let err = rows_from_sequence(&json!([1, 2]), "http://x").unwrap_err();
        assert!(err.is_unparsable());
    }

    #[test]
    fn rows_from_response_accepts_object_and_array() {
        let rows = rows_from_response(&json!({"k": 1}), "http://x").unwrap();
        assert_eq!(rows.len(), 1);

        let rows = rows_from_response(&json!([{"k": 1}, {"k": 2}]), "http://x").unwrap();
        assert_eq!(rows.len(), 2);

        assert!(rows_from_response(&json!(42), "http://x").is_err());
    }

    #[test]
    fn records_from_rows_pads_and_extends() {
        let rows = vec![
            vec![json!(" Name "), json!("Value")],
            vec![json!("a"), json!(1), json!("extra")],
            vec![json!("b")],
        ];
        let records = records_from_rows(&rows, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some(&json!("a")));
        assert_eq!(records[0].get("column_2"), Some(&json!("extra")));
        assert_eq!(records[1].get("value"), Some(&Value::Null));
    }

    #[test]
    fn header_row_out_of_range_yields_nothing() {
        let rows = vec![vec![json!("only")]];
        assert!(records_from_rows(&rows, 3).is_empty());
    }

    #[test]
    fn rule_deserializes_from_yaml() {
        let yaml = r#"
selectors:
  - name: title
    selector: "h1.title"
  - name: image
    selector: "img.hero"
    attr: src
table_selector: "table.data"
header_row: 0
filters:
  - {column: status, operator: "==", value: active}
  - {column: count, operator: ">", value: 3}
columns: [title, status]
"#;
        let rule: ExtractionRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.selectors.len(), 2);
        assert_eq!(rule.selectors[1].attr.as_deref(), Some("src"));
        assert_eq!(rule.header_row, Some(0));
        assert_eq!(rule.filters.len(), 2);
        assert_eq!(rule.filters[1].operator, FilterOp::Gt);
        assert_eq!(rule.columns.as_deref(), Some(&["title".to_string(), "status".to_string()][..]));
    }
}
