// ABOUTME: Run status accumulation and rendering: one outcome per (topic, country, source).
// ABOUTME: A report is always produced, even when every source in the run failed.

//! Run-level status reporting.
//!
//! A [`RunReport`] is an explicit value threaded through the pipeline, never
//! ambient state. It accumulates one outcome per source as dispatch
//! completes, plus configuration-level failures, and renders both a
//! human-readable text artifact and a structured JSON artifact. Operators can
//! always distinguish "ran and everything failed" from "did not run".

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one source in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { records: usize },
    Error { reason: String },
    Skipped,
}

/// One source's outcome, fully keyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub topic: String,
    pub country_code: String,
    pub source_name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// A configuration that could not be resolved at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFailure {
    pub path: String,
    pub reason: String,
}

/// The status record of one engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<SourceOutcome>,
    pub config_failures: Vec<ConfigFailure>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            outcomes: Vec::new(),
            config_failures: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        topic: &str,
        country_code: &str,
        source_name: &str,
        outcome: Outcome,
    ) {
        self.outcomes.push(SourceOutcome {
            topic: topic.to_string(),
            country_code: country_code.to_string(),
            source_name: source_name.to_string(),
            outcome,
        });
    }

    pub fn record_config_failure(&mut self, path: &Path, reason: impl Into<String>) {
        self.config_failures.push(ConfigFailure {
            path: path.display().to_string(),
            reason: reason.into(),
        });
    }

    pub fn successes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Success { .. }))
            .count()
    }

    pub fn errors(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Error { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped))
            .count()
    }

    /// The human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        writeln!(
            out,
            "run {}",
            self.started_at
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
        .unwrap();

        for failure in &self.config_failures {
            writeln!(out, "FAILED CONFIG {}: {}", failure.path, failure.reason).unwrap();
        }

        for entry in &self.outcomes {
            let key = format!(
                "{}/{}/{}",
                entry.topic, entry.country_code, entry.source_name
            );
            match &entry.outcome {
                Outcome::Success { records } => {
                    writeln!(out, "OK      {} ({} records)", key, records).unwrap()
                }
                Outcome::Error { reason } => writeln!(out, "ERROR   {}: {}", key, reason).unwrap(),
                Outcome::Skipped => writeln!(out, "SKIPPED {}", key).unwrap(),
            }
        }

        writeln!(
            out,
            "total: {} ok, {} error, {} skipped",
            self.successes(),
            self.errors(),
            self.skipped()
        )
        .unwrap();
        out
    }

    /// Persists the text and JSON artifacts under `<out_root>/status/`.
    pub fn persist(&self, out_root: &Path) -> std::io::Result<(PathBuf, PathBuf)> {
        let dir = out_root.join("status");
        std::fs::create_dir_all(&dir)?;
        let stamp = self.started_at.format("%Y%m%dT%H%M%SZ");

        let text_path = dir.join(format!("run-{}.txt", stamp));
        std::fs::write(&text_path, self.render())?;

        let json_path = dir.join(format!("run-{}.json", stamp));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&json_path, json)?;

        Ok((text_path, json_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn report() -> RunReport {
        let mut r = RunReport::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
        r.record("health", "US", "cdc", Outcome::Success { records: 12 });
        r.record(
            "health",
            "US",
            "broken",
            Outcome::Error {
                reason: "fetch error".into(),
            },
        );
        r.record("health", "US", "legacy", Outcome::Skipped);
        r
    }

    #[test]
    fn render_lists_every_outcome() {
        let text = report().render();
        assert!(text.contains("OK      health/US/cdc (12 records)"));
        assert!(text.contains("ERROR   health/US/broken: fetch error"));
        assert!(text.contains("SKIPPED health/US/legacy"));
        assert!(text.contains("total: 1 ok, 1 error, 1 skipped"));
    }

    #[test]
    fn all_failed_still_renders() {
        let mut r = RunReport::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
        r.record(
            "health",
            "US",
            "only",
            Outcome::Error {
                reason: "timeout".into(),
            },
        );
        let text = r.render();
        assert!(text.contains("total: 0 ok, 1 error, 0 skipped"));
    }

    #[test]
    fn json_roundtrip_keeps_status_tags() {
        let r = report();
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"status\":\"skipped\""));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcomes.len(), 3);
    }

    #[test]
    fn persist_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let (text_path, json_path) = report().persist(dir.path()).unwrap();
        assert!(text_path.exists());
        assert!(json_path.exists());
        assert!(text_path.file_name().unwrap().to_str().unwrap().starts_with("run-20250601"));
    }

    #[test]
    fn config_failures_appear_in_render() {
        let mut r = RunReport::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
        r.record_config_failure(Path::new("topics/health/us/index.yaml"), "bad yaml");
        let text = r.render();
        assert!(text.contains("FAILED CONFIG"));
        assert!(text.contains("bad yaml"));
    }
}
