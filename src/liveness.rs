//! Block-production liveness based on a monotonically growing counter.

use crate::config::LivenessConfig;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Where the progress counter lives inside a fetched document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricSource {
    /// Prometheus text exposition, first sample of `metric`.
    Prometheus { metric: String },
    /// RFC 6901 pointer into a JSON document.
    Json { pointer: String },
}

impl MetricSource {
    pub fn extract(&self, body: &str) -> Option<u64> {
        match self {
            MetricSource::Prometheus { metric } => extract_prometheus(body, metric),
            MetricSource::Json { pointer } => extract_json(body, pointer),
        }
    }
}

pub fn extract_prometheus(body: &str, metric: &str) -> Option<u64> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .find_map(|line| {
            let name_end = line
                .find(|c: char| c == '{' || c.is_whitespace())
                .unwrap_or(line.len());
            if &line[..name_end] != metric {
                return None;
            }
            let rest = &line[name_end..];
            let rest = match rest.strip_prefix('{') {
                Some(labelled) => &labelled[labelled.rfind('}')? + 1..],
                None => rest,
            };
            parse_counter(rest.split_whitespace().next()?)
        })
}

pub fn extract_json(body: &str, pointer: &str) -> Option<u64> {
    let document: Value = serde_json::from_str(body).ok()?;
    match document.pointer(pointer)? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().and_then(float_counter)),
        Value::String(text) => parse_counter(text.trim()),
        _ => None,
    }
}

/// Decimal, float or `0x`-prefixed hex (as returned by node RPC APIs).
fn parse_counter(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).ok();
    }
    text.parse::<u64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().and_then(float_counter))
}

fn float_counter(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

#[async_trait]
pub trait ProgressProbe: Send + Sync {
    /// Current counter value, `None` when it cannot be observed.
    async fn observe(&self) -> Option<u64>;
}

pub struct HttpProgressProbe {
    client: Client,
    url: String,
    source: MetricSource,
}

impl HttpProgressProbe {
    pub fn new(config: &LivenessConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            source: config.source.clone(),
        })
    }
}

#[async_trait]
impl ProgressProbe for HttpProgressProbe {
    async fn observe(&self) -> Option<u64> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(url = %self.url, status = response.status().as_u16(), "liveness endpoint rejected probe");
                return None;
            }
            Err(err) => {
                tracing::debug!(url = %self.url, error = %err, "liveness probe failed");
                return None;
            }
        };
        let body = response.text().await.ok()?;
        let value = self.source.extract(&body);
        if value.is_none() {
            tracing::debug!(url = %self.url, "liveness counter missing from response");
        }
        value
    }
}

/// Tracks the last observed counter; progress means strictly greater.
pub struct LivenessMonitor {
    probe: Box<dyn ProgressProbe>,
    last: u64,
}

impl LivenessMonitor {
    pub fn new(probe: Box<dyn ProgressProbe>) -> Self {
        Self { probe, last: 0 }
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    /// True when the counter advanced since the previous observation.
    pub async fn check(&mut self) -> bool {
        match self.probe.observe().await {
            Some(value) => {
                let alive = value > self.last;
                self.last = value;
                alive
            }
            None => false,
        }
    }
}
