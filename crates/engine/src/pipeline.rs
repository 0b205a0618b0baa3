// ABOUTME: The Engine: configuration runs, closed-enum source dispatch, failure isolation.
// ABOUTME: Sources fetch concurrently; normalization and the partition write happen in configuration order.

use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::config::{resolve_config, ResolvedConfig, ResolvedSource, SourceType};
use crate::error::{ConfigError, ExtractionError};
use crate::extract;
use crate::fetch::{is_private_ip, FetchOptions};
use crate::normalize::{normalize, RunContext};
use crate::report::{Outcome, RunReport};
use crate::rules::{apply_rule, RawRecord};
use crate::writer::{PartitionKey, PartitionWriter, PARTITION_SIZE_CEILING};

/// Engine-wide options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Per-source fetch timeout. Mandatory: a hanging source must not stall
    /// the run.
    pub timeout: Duration,
    pub user_agent: String,
    /// Concurrent fetch+extract operations per configuration.
    pub concurrency: usize,
    pub allow_private_networks: bool,
    /// Root directory of the partitioned output dataset.
    pub out_dir: PathBuf,
    pub partition_ceiling: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "opendata/0.1".to_string(),
            concurrency: 4,
            allow_private_networks: false,
            out_dir: PathBuf::from("data"),
            partition_ceiling: PARTITION_SIZE_CEILING,
        }
    }
}

/// Builder for [`Engine`] instances.
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    opts: EngineOptions,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-source fetch timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.opts.user_agent = user_agent.into();
        self
    }

    /// Set the per-configuration fetch concurrency.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.opts.concurrency = concurrency;
        self
    }

    /// Allow or disallow requests to private networks.
    pub fn allow_private_networks(mut self, allow: bool) -> Self {
        self.opts.allow_private_networks = allow;
        self
    }

    /// Set the output dataset root.
    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.opts.out_dir = dir.into();
        self
    }

    /// Override the partition size ceiling.
    pub fn partition_ceiling(mut self, ceiling: u64) -> Self {
        self.opts.partition_ceiling = ceiling;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.opts)
    }
}

/// The collection engine.
pub struct Engine {
    opts: EngineOptions,
    http: reqwest::Client,
    writer: PartitionWriter,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn new(opts: EngineOptions) -> Self {
        let allow_private = opts.allow_private_networks;
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if !allow_private {
                let next = attempt.url().clone();
                if let Some(host) = next.host_str() {
                    let port = next
                        .port()
                        .unwrap_or(if next.scheme() == "https" { 443 } else { 80 });
                    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                        if is_private_ip(&ip) {
                            return attempt.error("redirect to private address blocked");
                        }
                    } else {
                        // Synchronous resolution: redirect policies cannot await.
                        match (host, port).to_socket_addrs() {
                            Ok(addrs) => {
                                for addr in addrs {
                                    if is_private_ip(&addr.ip()) {
                                        return attempt
                                            .error("redirect to private address blocked");
                                    }
                                }
                            }
                            Err(_) => return attempt.error("DNS lookup failed during redirect"),
                        }
                    }
                }
            }
            attempt.follow()
        });

        let http = reqwest::Client::builder()
            .redirect(redirect_policy)
            .user_agent(&opts.user_agent)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .expect("failed to build HTTP client");

        let writer = PartitionWriter::with_ceiling(&opts.out_dir, opts.partition_ceiling);

        Self { opts, http, writer }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Runs every configuration path, isolating failures per configuration,
    /// and returns the accumulated report. Always returns a report.
    pub async fn run_paths(&self, paths: &[PathBuf]) -> RunReport {
        let mut report = RunReport::new(Utc::now());
        for path in paths {
            if let Err(e) = self.run_config_file(path, &mut report).await {
                tracing::error!(path = %path.display(), error = %e, "configuration failed");
                report.record_config_failure(path, e.to_string());
            }
        }
        report
    }

    /// Resolves and runs one configuration document.
    pub async fn run_config_file(
        &self,
        path: &Path,
        report: &mut RunReport,
    ) -> Result<(), ConfigError> {
        let config = resolve_config(path)?;
        self.run_config(&config, report).await;
        Ok(())
    }

    /// Runs one resolved configuration: concurrent fetch+extract, then
    /// in-order normalize and a single partition write.
    pub async fn run_config(&self, config: &ResolvedConfig, report: &mut RunReport) {
        let topic = &config.metadata.topic;
        let country = &config.metadata.country_code;
        let ctx = RunContext {
            topic: topic.clone(),
            country_code: country.clone(),
            event_time: report.started_at,
        };
        let key = PartitionKey {
            topic: topic.clone(),
            country_code: country.clone(),
            date: report.started_at.date_naive(),
        };

        for source in config.sources.iter().filter(|s| !s.enabled) {
            tracing::info!(source = %source.name, "source disabled, skipping");
            report.record(topic, country, &source.name, Outcome::Skipped);
        }

        let enabled: Vec<&ResolvedSource> = config.sources.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return;
        }

        let mut results: Vec<(usize, Result<Vec<RawRecord>, ExtractionError>)> =
            stream::iter(enabled.iter().enumerate().map(|(i, &source)| async move {
                (i, self.dispatch(source).await)
            }))
            .buffer_unordered(self.opts.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        let mut normalized = Vec::new();
        let mut extracted: Vec<(String, usize)> = Vec::new();
        for (i, result) in results {
            let source = enabled[i];
            match result {
                Ok(raws) => {
                    extracted.push((source.name.clone(), raws.len()));
                    for (idx, raw) in raws.into_iter().enumerate() {
                        normalized.push(normalize(raw, source, &ctx, idx));
                    }
                }
                Err(e) => {
                    tracing::error!(source = %source.name, error = %e, "source failed");
                    report.record(
                        topic,
                        country,
                        &source.name,
                        Outcome::Error {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        if extracted.is_empty() {
            return;
        }

        let names: Vec<String> = extracted.iter().map(|(n, _)| n.clone()).collect();
        match self.writer.write(&key, &names, &normalized).await {
            Ok(path) => {
                tracing::info!(
                    path = %path.display(),
                    sources = names.len(),
                    records = normalized.len(),
                    "partition updated"
                );
                for (name, count) in extracted {
                    report.record(topic, country, &name, Outcome::Success { records: count });
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "partition write failed");
                for (name, _) in extracted {
                    report.record(
                        topic,
                        country,
                        &name,
                        Outcome::Error {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    /// Selects the extractor by the source's declared type and applies the
    /// rule's filters and projection to its output.
    async fn dispatch(&self, source: &ResolvedSource) -> Result<Vec<RawRecord>, ExtractionError> {
        tracing::info!(
            source = %source.name,
            kind = %source.kind,
            url = %source.url,
            "dispatching source"
        );
        let opts = FetchOptions {
            timeout: self.opts.timeout,
            allow_private_networks: self.opts.allow_private_networks,
        };

        let raws = match source.kind {
            SourceType::Html => extract::html::extract(&self.http, source, &opts).await?,
            SourceType::Pdf => extract::pdf::extract(&self.http, source, &opts).await?,
            SourceType::Excel => extract::excel::extract(&self.http, source, &opts).await?,
            SourceType::Csv => extract::csv::extract(&self.http, source, &opts).await?,
            SourceType::Api => extract::api::extract(&self.http, source, &opts).await?,
            SourceType::Scraper => extract::scraper::extract(&self.http, source, &opts).await?,
        };

        Ok(apply_rule(raws, &source.extraction))
    }
}
