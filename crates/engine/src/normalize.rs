// ABOUTME: Schema normalizer: maps raw records onto the standard field vocabulary.
// ABOUTME: Fixed core metadata plus known vocabulary slots; unrecognized fields pass through verbatim.

//! Normalization against the standard field vocabulary.
//!
//! A [`NormalizedRecord`] is a fixed core (the six always-present metadata
//! fields) plus two open maps: `known` holds canonical vocabulary fields,
//! `extras` holds everything else verbatim. Known synonyms collapse onto one
//! canonical name; `price` and `cost` are distinct vocabulary fields and are
//! never merged into each other.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;

use crate::config::ResolvedSource;
use crate::rules::{string_form, RawRecord};

/// Core metadata fields, always non-null, in output order.
pub const CORE_FIELDS: &[&str] = &[
    "id",
    "event_time",
    "country_code",
    "topic",
    "source_name",
    "source_url",
];

/// The non-core vocabulary, in output order: location, contact, temporal,
/// categorical, content, numeric.
pub const KNOWN_FIELDS: &[&str] = &[
    // location
    "address",
    "city",
    "region",
    "postal_code",
    "latitude",
    "longitude",
    "venue",
    // contact
    "email",
    "phone",
    "website",
    // temporal
    "start_date",
    "end_date",
    "published_at",
    "year",
    // categorical
    "category",
    "tags",
    "status",
    // content
    "title",
    "description",
    "content",
    "language",
    "image_url",
    // numeric
    "price",
    "cost",
    "amount",
    "capacity",
];

static SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("lat", "latitude"),
        ("lng", "longitude"),
        ("lon", "longitude"),
        ("long", "longitude"),
        ("location", "address"),
        ("town", "city"),
        ("state", "region"),
        ("province", "region"),
        ("zip", "postal_code"),
        ("zip_code", "postal_code"),
        ("postcode", "postal_code"),
        ("e_mail", "email"),
        ("mail", "email"),
        ("telephone", "phone"),
        ("tel", "phone"),
        ("link", "website"),
        ("url", "website"),
        ("homepage", "website"),
        ("starts_at", "start_date"),
        ("started_at", "start_date"),
        ("ends_at", "end_date"),
        ("ended_at", "end_date"),
        ("published", "published_at"),
        ("categories", "category"),
        ("summary", "description"),
        ("img", "image_url"),
        ("image", "image_url"),
        ("lang", "language"),
        ("name", "title"),
    ])
});

/// Canonicalizes a raw field name: trim, lowercase, runs of
/// non-alphanumerics collapse to a single underscore.
pub fn canonical_field_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = true;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Resolves a raw field name to its canonical vocabulary field, if any.
pub fn vocabulary_field(raw: &str) -> Option<&'static str> {
    let canonical = canonical_field_name(raw);
    let lookup = SYNONYMS
        .get(canonical.as_str())
        .copied()
        .unwrap_or(canonical.as_str());
    CORE_FIELDS
        .iter()
        .chain(KNOWN_FIELDS.iter())
        .find(|f| **f == lookup)
        .copied()
}

/// The run-level facts stamped onto every record.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub topic: String,
    pub country_code: String,
    pub event_time: DateTime<Utc>,
}

/// One record in the standard vocabulary.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub event_time: DateTime<Utc>,
    pub country_code: String,
    pub topic: String,
    pub source_name: String,
    pub source_url: String,
    /// Canonical vocabulary fields present in this record.
    #[serde(flatten)]
    pub known: RawRecord,
    /// Unrecognized fields, kept verbatim under their original names.
    #[serde(flatten)]
    pub extras: RawRecord,
}

impl NormalizedRecord {
    /// The string cell for a named column, for tabular output.
    pub fn cell(&self, column: &str) -> String {
        match column {
            "id" => self.id.clone(),
            "event_time" => self
                .event_time
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "country_code" => self.country_code.clone(),
            "topic" => self.topic.clone(),
            "source_name" => self.source_name.clone(),
            "source_url" => self.source_url.clone(),
            _ => self
                .known
                .get(column)
                .or_else(|| self.extras.get(column))
                .map(cell_value)
                .unwrap_or_default(),
        }
    }
}

fn cell_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Maps one raw record onto the vocabulary.
///
/// `index` is the zero-based position of the record within its source's
/// extraction output; it seeds the fallback id. The partition-defining core
/// fields (`topic`, `country_code`, `source_name`, `source_url`) always come
/// from context — a raw record cannot reassign itself to another partition.
/// `id` and `event_time` are taken from the raw record when usable.
pub fn normalize(
    raw: RawRecord,
    source: &ResolvedSource,
    ctx: &RunContext,
    index: usize,
) -> NormalizedRecord {
    let mut known = RawRecord::new();
    let mut extras = RawRecord::new();
    let mut id: Option<String> = None;
    let mut event_time = ctx.event_time;

    for (key, value) in raw {
        match vocabulary_field(&key) {
            Some("id") => {
                if id.is_none() && !matches!(value, Value::Null) {
                    id = Some(string_form(&value));
                }
            }
            Some("event_time") => {
                match value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                {
                    Some(dt) => event_time = dt.with_timezone(&Utc),
                    None => {
                        tracing::debug!(field = %key, "unusable event_time value ignored")
                    }
                }
            }
            Some(core) if CORE_FIELDS.contains(&core) => {
                // Partition-defining fields are stamped from context only.
                tracing::debug!(field = %key, "core field from record discarded");
            }
            Some(field) => {
                if known.contains_key(field) {
                    // First occurrence won the slot; keep the rest verbatim.
                    extras.insert(key.trim().to_string(), value);
                } else {
                    known.insert(field.to_string(), value);
                }
            }
            None => {
                extras.insert(key.trim().to_string(), value);
            }
        }
    }

    NormalizedRecord {
        id: id.unwrap_or_else(|| format!("{}-{}", source.name, index + 1)),
        event_time,
        country_code: ctx.country_code.clone(),
        topic: ctx.topic.clone(),
        source_name: source.name.clone(),
        source_url: source.url.clone(),
        known,
        extras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpMethod, SourceType};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_source() -> ResolvedSource {
        ResolvedSource {
            name: "events-api".into(),
            enabled: true,
            kind: SourceType::Api,
            url: "https://api.example.com/events".into(),
            api_key: None,
            method: HttpMethod::Get,
            extraction: Default::default(),
        }
    }

    fn test_ctx() -> RunContext {
        RunContext {
            topic: "events".into(),
            country_code: "JP".into(),
            event_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn raw(pairs: &[(&str, Value)]) -> RawRecord {
        let mut r = RawRecord::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_field_name("  Event Name "), "event_name");
        assert_eq!(canonical_field_name("Zip-Code"), "zip_code");
        assert_eq!(canonical_field_name("Price (USD)"), "price_usd");
        assert_eq!(canonical_field_name("Δvalue"), "δvalue");
        assert_eq!(canonical_field_name("---"), "");
    }

    #[test]
    fn synonyms_collapse() {
        assert_eq!(vocabulary_field("Lat"), Some("latitude"));
        assert_eq!(vocabulary_field("lng"), Some("longitude"));
        assert_eq!(vocabulary_field("Telephone"), Some("phone"));
        assert_eq!(vocabulary_field("ZIP Code"), Some("postal_code"));
        assert_eq!(vocabulary_field("Name"), Some("title"));
        assert_eq!(vocabulary_field("entirely_novel"), None);
    }

    #[test]
    fn price_and_cost_stay_distinct() {
        assert_eq!(vocabulary_field("price"), Some("price"));
        assert_eq!(vocabulary_field("cost"), Some("cost"));

        let rec = normalize(
            raw(&[("price", json!("12.50")), ("cost", json!("3.00"))]),
            &test_source(),
            &test_ctx(),
            0,
        );
        assert_eq!(rec.known.get("price"), Some(&json!("12.50")));
        assert_eq!(rec.known.get("cost"), Some(&json!("3.00")));
    }

    #[test]
    fn core_fields_backfilled_from_context() {
        let rec = normalize(raw(&[("title", json!("A"))]), &test_source(), &test_ctx(), 4);
        assert_eq!(rec.id, "events-api-5");
        assert_eq!(rec.country_code, "JP");
        assert_eq!(rec.topic, "events");
        assert_eq!(rec.source_name, "events-api");
        assert_eq!(rec.source_url, "https://api.example.com/events");
        assert_eq!(rec.event_time, test_ctx().event_time);
    }

    #[test]
    fn raw_id_and_event_time_win_when_usable() {
        let rec = normalize(
            raw(&[
                ("id", json!(981)),
                ("event_time", json!("2024-03-01T00:00:00Z")),
            ]),
            &test_source(),
            &test_ctx(),
            0,
        );
        assert_eq!(rec.id, "981");
        assert_eq!(rec.event_time.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn partition_fields_cannot_be_reassigned() {
        let rec = normalize(
            raw(&[("country_code", json!("XX")), ("topic", json!("other"))]),
            &test_source(),
            &test_ctx(),
            0,
        );
        assert_eq!(rec.country_code, "JP");
        assert_eq!(rec.topic, "events");
        assert!(rec.extras.is_empty());
    }

    #[test]
    fn unknown_fields_pass_through_verbatim() {
        let rec = normalize(
            raw(&[("Organizer Twitter", json!("@someone"))]),
            &test_source(),
            &test_ctx(),
            0,
        );
        assert_eq!(rec.extras.get("Organizer Twitter"), Some(&json!("@someone")));
    }

    #[test]
    fn first_occurrence_wins_vocabulary_slot() {
        let rec = normalize(
            raw(&[("title", json!("canonical")), ("Name", json!("synonym"))]),
            &test_source(),
            &test_ctx(),
            0,
        );
        assert_eq!(rec.known.get("title"), Some(&json!("canonical")));
        assert_eq!(rec.extras.get("Name"), Some(&json!("synonym")));
    }

    #[test]
    fn cell_rendering() {
        let rec = normalize(
            raw(&[("title", json!("A")), ("tags", json!(["x", "y"]))]),
            &test_source(),
            &test_ctx(),
            0,
        );
        assert_eq!(rec.cell("title"), "A");
        assert_eq!(rec.cell("tags"), "[\"x\",\"y\"]");
        assert_eq!(rec.cell("event_time"), "2025-06-01T12:00:00Z");
        assert_eq!(rec.cell("nonexistent"), "");
    }
}
