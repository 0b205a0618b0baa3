// ABOUTME: Main library entry point for the opendata collection engine.
// ABOUTME: Re-exports the public API: Engine, configuration types, records, writer, and errors.

//! opendata-engine - a declarative, multi-format data-extraction pipeline.
//!
//! Given a per-topic, per-country configuration describing remote data
//! sources (HTML pages, PDFs, spreadsheets, raw CSV, REST APIs, site
//! scrapes), the engine fetches, extracts, normalizes, and merges records
//! into a partitioned output dataset, then reports per-source
//! success/failure. One failing source never takes down its siblings.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use opendata_engine::Engine;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Engine::builder().out_dir("data").build();
//!     let report = engine.run_paths(&[PathBuf::from("topics/health/us/index.yaml")]).await;
//!     print!("{}", report.render());
//! }
//! ```

pub mod config;
pub mod countries;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod writer;

pub use crate::config::{
    resolve_config, HttpMethod, Metadata, ResolvedConfig, ResolvedSource, SourceType,
};
pub use crate::countries::CountryRegistry;
pub use crate::error::{CapacityError, ConfigError, ExtractionError, ExtractionErrorCode};
pub use crate::normalize::{NormalizedRecord, RunContext, CORE_FIELDS, KNOWN_FIELDS};
pub use crate::pipeline::{Engine, EngineBuilder, EngineOptions};
pub use crate::report::{Outcome, RunReport, SourceOutcome};
pub use crate::rules::{ExtractionRule, Filter, FilterOp, NamedSelector, RawRecord};
pub use crate::writer::{PartitionKey, PartitionWriter, WriteError, PARTITION_SIZE_CEILING};
