// ABOUTME: Shared HTTP layer: request shaping, mandatory timeouts, private-network guard, charset decode.
// ABOUTME: Every extractor goes through fetch(); a hanging source times out instead of stalling the run.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use ipnet::{Ipv4Net, Ipv6Net};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::config::{HttpMethod, ResolvedSource};
use crate::error::ExtractionError;
use crate::rules::string_form;

static PRIVATE_V4: Lazy<Vec<Ipv4Net>> = Lazy::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "169.254.0.0/16",
    ]
    .iter()
    .map(|n| n.parse().unwrap())
    .collect()
});

static PRIVATE_V6: Lazy<Vec<Ipv6Net>> =
    Lazy::new(|| ["fc00::/7", "fe80::/10"].iter().map(|n| n.parse().unwrap()).collect());

/// Check if an IP address is in a private/reserved range.
pub fn is_private_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(ip) => PRIVATE_V4.iter().any(|net| net.contains(ip)),
        IpAddr::V6(ip) => ip.is_loopback() || PRIVATE_V6.iter().any(|net| net.contains(ip)),
    }
}

/// How the outbound request is shaped: headers, query params, method, body,
/// and API-key authentication.
#[derive(Debug, Clone, Default)]
pub struct RequestShaping {
    pub headers: HashMap<String, String>,
    pub params: HashMap<String, Value>,
    pub method: HttpMethod,
    pub payload: Option<Value>,
    pub api_key: Option<String>,
}

impl RequestShaping {
    /// Builds the shaping for a resolved source from its extraction block.
    pub fn from_source(source: &ResolvedSource) -> Self {
        Self {
            headers: source.extraction.headers.clone(),
            params: source.extraction.params.clone(),
            method: source.method,
            payload: source.extraction.payload.clone(),
            api_key: source.api_key.clone(),
        }
    }
}

/// Per-fetch policy knobs.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub allow_private_networks: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            allow_private_networks: false,
        }
    }
}

/// A fetched response body with enough context to decode it.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl FetchResult {
    /// Decode the body to text, honoring a charset from the content-type
    /// header and falling back to detection.
    pub fn text_utf8(&self) -> String {
        decode_body(&self.body, self.content_type.as_deref())
    }
}

fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    if let Some(charset) = content_type.and_then(extract_charset) {
        if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
            let (decoded, _, _) = encoding.decode(body);
            return decoded.into_owned();
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

fn extract_charset(content_type: &str) -> Option<String> {
    for part in content_type.to_lowercase().split(';') {
        if let Some(charset) = part.trim().strip_prefix("charset=") {
            return Some(charset.trim_matches('"').trim_matches('\'').to_string());
        }
    }
    None
}

async fn guard_host(url: &str, parsed: &url::Url, op: &str) -> Result<(), ExtractionError> {
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return Ok(()),
    };

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(ExtractionError::ssrf(
                url,
                op,
                Some(anyhow::anyhow!("private addresses are not allowed")),
            ));
        }
        return Ok(());
    }

    let port = parsed
        .port()
        .unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });
    let addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        ExtractionError::fetch(url, op, Some(anyhow::anyhow!("DNS lookup failed: {}", e)))
    })?;
    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(ExtractionError::ssrf(
                url,
                op,
                Some(anyhow::anyhow!("private addresses are not allowed")),
            ));
        }
    }
    Ok(())
}

/// Fetch a source URL with the given shaping. A single attempt: failures are
/// recorded by the caller and the run moves on, retry policy is not the
/// engine's concern.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    shaping: &RequestShaping,
    opts: &FetchOptions,
) -> Result<FetchResult, ExtractionError> {
    if url.is_empty() {
        return Err(ExtractionError::invalid_url(url, "Fetch", None));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| ExtractionError::invalid_url(url, "Fetch", Some(anyhow::anyhow!(e))))?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ExtractionError::invalid_url(
            url,
            "Fetch",
            Some(anyhow::anyhow!("scheme must be http or https")),
        ));
    }

    if !opts.allow_private_networks {
        guard_host(url, &parsed, "Fetch").await?;
    }

    let mut request = match shaping.method {
        HttpMethod::Get => client.get(parsed.clone()),
        HttpMethod::Post => client.post(parsed.clone()),
    };

    if !shaping.params.is_empty() {
        let query: Vec<(String, String)> = shaping
            .params
            .iter()
            .map(|(k, v)| (k.clone(), string_form(v)))
            .collect();
        request = request.query(&query);
    }

    for (key, value) in &shaping.headers {
        request = request.header(key, value);
    }

    if let Some(ref key) = shaping.api_key {
        if !shaping.headers.contains_key("X-API-Key") {
            request = request.header("X-API-Key", key);
        }
        if !shaping.headers.contains_key("Authorization") {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
    }

    if shaping.method == HttpMethod::Post {
        if let Some(ref payload) = shaping.payload {
            request = request.json(payload);
        }
    }

    let response = request.timeout(opts.timeout).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractionError::timeout(url, "Fetch", Some(anyhow::anyhow!(e)))
        } else {
            ExtractionError::fetch(url, "Fetch", Some(anyhow::anyhow!(e)))
        }
    })?;

    // Re-check the landing host: a redirect may have moved us somewhere the
    // pre-flight check never saw.
    if !opts.allow_private_networks {
        let final_url = response.url().clone();
        guard_host(url, &final_url, "Fetch").await?;
    }

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::fetch(
            url,
            "Fetch",
            Some(anyhow::anyhow!("unexpected status {}", status)),
        ));
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ExtractionError::timeout(url, "Fetch", Some(anyhow::anyhow!(e)))
        } else {
            ExtractionError::fetch(url, "Fetch", Some(anyhow::anyhow!(e)))
        }
    })?;

    Ok(FetchResult {
        status: status.as_u16(),
        final_url,
        content_type,
        body,
    })
}
