// ABOUTME: Partitioned CSV writer keyed by (topic, country, date) with a hard size ceiling.
// ABOUTME: Rerun policy: overwrite-by-source within a partition, append across sources.

//! The partitioned output writer.
//!
//! A partition is one CSV file at `<root>/<topic>/<YYYY>/<MM>/<DD>/<cc>.csv`.
//! Writes merge: rows belonging to the sources being written are replaced,
//! rows from other sources are retained in their original order, and the new
//! rows append after them in source-configuration order. The merged file is
//! assembled in memory, checked against the size ceiling, then swapped in
//! with a rename so a rejected write leaves prior contents byte-identical.
//!
//! Writers to the same key serialize through a per-key async mutex; a lock
//! file guards against a concurrently running sibling process.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::error::CapacityError;
use crate::normalize::{NormalizedRecord, CORE_FIELDS, KNOWN_FIELDS};

/// The partition byte-size ceiling: 100 MB.
pub const PARTITION_SIZE_CEILING: u64 = 100 * 1024 * 1024;

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY_MS: u64 = 100;

/// Identifies one partition of the output dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub topic: String,
    pub country_code: String,
    pub date: NaiveDate,
}

impl PartitionKey {
    /// Path of the partition file relative to the output root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.topic)
            .join(self.date.format("%Y/%m/%d").to_string())
            .join(format!("{}.csv", self.country_code.to_lowercase()))
    }
}

/// Errors from a partition write. Isolated to the partition.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error("partition io: {0}")]
    Io(#[from] std::io::Error),
    #[error("partition csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("partition {path} is locked by another run")]
    Locked { path: PathBuf },
}

static PARTITION_LOCKS: Lazy<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(Default::default);

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = PARTITION_LOCKS.lock().expect("lock registry poisoned");
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Removes the on-disk lock file when the guard drops.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

async fn acquire_lock_file(partition_path: &Path) -> Result<LockFile, WriteError> {
    let lock_path = partition_path.with_extension("csv.lock");
    for _ in 0..LOCK_ATTEMPTS {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => return Ok(LockFile { path: lock_path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tokio::time::sleep(std::time::Duration::from_millis(LOCK_RETRY_MS)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(WriteError::Locked {
        path: partition_path.to_path_buf(),
    })
}

/// Writes normalized records into partitions under an output root.
#[derive(Debug, Clone)]
pub struct PartitionWriter {
    root: PathBuf,
    ceiling: u64,
}

impl PartitionWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ceiling: PARTITION_SIZE_CEILING,
        }
    }

    /// Override the size ceiling. Mainly for tests.
    pub fn with_ceiling(root: impl Into<PathBuf>, ceiling: u64) -> Self {
        Self {
            root: root.into(),
            ceiling,
        }
    }

    /// Absolute path of a partition file.
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Merges records into the partition identified by `key`.
    ///
    /// `source_names` is the replacement set: existing rows belonging to any
    /// of these sources are dropped, even when a source contributes zero new
    /// records this run. Fails with [`CapacityError`] when the merged file
    /// would exceed the ceiling, leaving the partition untouched.
    pub async fn write(
        &self,
        key: &PartitionKey,
        source_names: &[String],
        records: &[NormalizedRecord],
    ) -> Result<PathBuf, WriteError> {
        let path = self.partition_path(key);
        let serial = lock_for(&path);
        let _serial = serial.lock().await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _lock_file = acquire_lock_file(&path).await?;

        let (existing_header, existing_rows) = read_partition(&path)?;
        let incoming: HashSet<&str> = source_names.iter().map(|s| s.as_str()).collect();

        let retained: Vec<Vec<String>> = match column_index(&existing_header, "source_name") {
            Some(idx) => existing_rows
                .into_iter()
                .filter(|row| {
                    row.get(idx)
                        .map(|name| !incoming.contains(name.as_str()))
                        .unwrap_or(true)
                })
                .collect(),
            None => {
                if !existing_header.is_empty() {
                    tracing::warn!(
                        path = %path.display(),
                        "existing partition has no source_name column, retaining all rows"
                    );
                }
                existing_rows
            }
        };

        let columns = merged_columns(&existing_header, records);
        let bytes = render_csv(&columns, &existing_header, &retained, records)?;

        if bytes.len() as u64 > self.ceiling {
            return Err(CapacityError {
                topic: key.topic.clone(),
                country_code: key.country_code.clone(),
                date: key.date.to_string(),
                size: bytes.len() as u64,
                ceiling: self.ceiling,
            }
            .into());
        }

        let tmp = path.with_extension("csv.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;

        tracing::info!(
            path = %path.display(),
            retained = retained.len(),
            written = records.len(),
            bytes = bytes.len(),
            "partition written"
        );
        Ok(path)
    }
}

fn read_partition(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), WriteError> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(|c| c.to_string()).collect());
    }
    Ok((header, rows))
}

fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h == name)
}

/// Column order: the six core fields, then known vocabulary fields in
/// vocabulary order, then new extras in first-seen order, then any leftover
/// existing columns in their original relative order.
fn merged_columns(existing_header: &[String], records: &[NormalizedRecord]) -> Vec<String> {
    let mut columns: Vec<String> = CORE_FIELDS.iter().map(|f| f.to_string()).collect();
    let mut seen: HashSet<String> = columns.iter().cloned().collect();

    for field in KNOWN_FIELDS {
        let used = records.iter().any(|r| r.known.contains_key(*field))
            || existing_header.iter().any(|h| h == field);
        if used && seen.insert(field.to_string()) {
            columns.push(field.to_string());
        }
    }

    for record in records {
        for key in record.extras.keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }

    for column in existing_header {
        if seen.insert(column.clone()) {
            columns.push(column.clone());
        }
    }

    columns
}

fn render_csv(
    columns: &[String],
    existing_header: &[String],
    retained: &[Vec<String>],
    records: &[NormalizedRecord],
) -> Result<Vec<u8>, WriteError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;

    for row in retained {
        let by_name: HashMap<&str, &str> = existing_header
            .iter()
            .zip(row.iter())
            .map(|(h, c)| (h.as_str(), c.as_str()))
            .collect();
        writer.write_record(
            columns
                .iter()
                .map(|col| by_name.get(col.as_str()).copied().unwrap_or("")),
        )?;
    }

    for record in records {
        writer.write_record(columns.iter().map(|col| record.cell(col)))?;
    }

    writer
        .into_inner()
        .map_err(|e| WriteError::Io(std::io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpMethod, ResolvedSource, SourceType};
    use crate::normalize::{normalize, RunContext};
    use crate::rules::RawRecord;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn key() -> PartitionKey {
        PartitionKey {
            topic: "health".into(),
            country_code: "US".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        }
    }

    fn source(name: &str) -> ResolvedSource {
        ResolvedSource {
            name: name.into(),
            enabled: true,
            kind: SourceType::Html,
            url: format!("https://example.com/{}", name),
            api_key: None,
            method: HttpMethod::Get,
            extraction: Default::default(),
        }
    }

    fn ctx() -> RunContext {
        RunContext {
            topic: "health".into(),
            country_code: "US".into(),
            event_time: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        }
    }

    fn record(src: &ResolvedSource, index: usize, pairs: &[(&str, serde_json::Value)]) -> NormalizedRecord {
        let mut raw = RawRecord::new();
        for (k, v) in pairs {
            raw.insert(k.to_string(), v.clone());
        }
        normalize(raw, src, &ctx(), index)
    }

    fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        read_partition(path).unwrap()
    }

    #[test]
    fn relative_path_layout() {
        assert_eq!(
            key().relative_path(),
            PathBuf::from("health/2025/06/01/us.csv")
        );
    }

    #[tokio::test]
    async fn writes_core_columns_and_rows() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path());
        let src = source("stats");
        let records = vec![record(&src, 0, &[("title", json!("A"))])];

        let path = writer
            .write(&key(), &["stats".into()], &records)
            .await
            .unwrap();

        let (header, rows) = read_rows(&path);
        assert_eq!(&header[..6], CORE_FIELDS);
        assert!(header.contains(&"title".to_string()));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "stats-1");
    }

    #[tokio::test]
    async fn rerun_replaces_only_its_own_source() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path());
        let a = source("alpha");
        let b = source("beta");

        writer
            .write(
                &key(),
                &["alpha".into()],
                &[record(&a, 0, &[("title", json!("a1"))])],
            )
            .await
            .unwrap();
        writer
            .write(
                &key(),
                &["beta".into()],
                &[record(&b, 0, &[("title", json!("b1"))])],
            )
            .await
            .unwrap();

        // Rerun alpha with different rows: beta must survive untouched.
        let path = writer
            .write(
                &key(),
                &["alpha".into()],
                &[
                    record(&a, 0, &[("title", json!("a2"))]),
                    record(&a, 1, &[("title", json!("a3"))]),
                ],
            )
            .await
            .unwrap();

        let (header, rows) = read_rows(&path);
        let name_idx = column_index(&header, "source_name").unwrap();
        let title_idx = column_index(&header, "title").unwrap();
        let titles: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r[name_idx].as_str(), r[title_idx].as_str()))
            .collect();
        assert_eq!(
            titles,
            vec![("beta", "b1"), ("alpha", "a2"), ("alpha", "a3")]
        );
    }

    #[tokio::test]
    async fn ceiling_rejects_write_and_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let big = PartitionWriter::new(dir.path());
        let src = source("stats");

        let path = big
            .write(
                &key(),
                &["stats".into()],
                &[record(&src, 0, &[("title", json!("keep me"))])],
            )
            .await
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        let tiny = PartitionWriter::with_ceiling(dir.path(), 32);
        let err = tiny
            .write(
                &key(),
                &["other".into()],
                &[record(&source("other"), 0, &[("title", json!("too big"))])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Capacity(_)));

        let after = std::fs::read(&path).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn column_union_spans_sources_and_runs() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path());

        writer
            .write(
                &key(),
                &["alpha".into()],
                &[record(&source("alpha"), 0, &[("quirk", json!("q"))])],
            )
            .await
            .unwrap();
        let path = writer
            .write(
                &key(),
                &["beta".into()],
                &[record(&source("beta"), 0, &[("other", json!("o"))])],
            )
            .await
            .unwrap();

        let (header, rows) = read_rows(&path);
        assert!(header.contains(&"quirk".to_string()));
        assert!(header.contains(&"other".to_string()));
        // The alpha row has an empty cell under the beta-only column.
        let other_idx = column_index(&header, "other").unwrap();
        assert_eq!(rows[0][other_idx], "");
    }

    #[tokio::test]
    async fn empty_replacement_clears_a_source() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path());

        let path = writer
            .write(
                &key(),
                &["alpha".into()],
                &[record(&source("alpha"), 0, &[("title", json!("a"))])],
            )
            .await
            .unwrap();
        writer.write(&key(), &["alpha".into()], &[]).await.unwrap();

        let (_, rows) = read_rows(&path);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn vocabulary_columns_order_before_extras() {
        let dir = TempDir::new().unwrap();
        let writer = PartitionWriter::new(dir.path());
        let src = source("stats");
        let path = writer
            .write(
                &key(),
                &["stats".into()],
                &[record(
                    &src,
                    0,
                    &[("zebra_extra", json!("z")), ("title", json!("t"))],
                )],
            )
            .await
            .unwrap();

        let (header, _) = read_rows(&path);
        let title_pos = column_index(&header, "title").unwrap();
        let extra_pos = column_index(&header, "zebra_extra").unwrap();
        assert!(title_pos < extra_pos);
    }
}
