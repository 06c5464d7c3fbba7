//! Request and response types exchanged with metric servers.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::{DataKind, DataValue, Histogram, HitCount};

/// Identity of one metric server. Equality is structural; the fan-out
/// status accounting keys on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct ServerInfo {
    pub hostname: String,
    pub port: u16,
}

impl ServerInfo {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// One tier of a recursive fan-out query.
///
/// A leader receiving this request queries `sources` on the caller's
/// behalf, re-partitioning through its own planner when the list exceeds
/// `max_fanout`. The inner payload is opaque to the fan-out machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredRequest {
    pub sources: Vec<ServerInfo>,
    pub max_fanout: u32,
    pub fanout_timeout_ms: u32,
    pub include_request_diagnostics: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TieredRequest {
    pub fn new(sources: Vec<ServerInfo>) -> Self {
        Self {
            sources,
            max_fanout: DEFAULT_MAX_FANOUT,
            fanout_timeout_ms: DEFAULT_FANOUT_TIMEOUT_MS,
            include_request_diagnostics: true,
            payload: serde_json::Value::Null,
        }
    }
}

pub const DEFAULT_MAX_FANOUT: u32 = 50;
pub const DEFAULT_FANOUT_TIMEOUT_MS: u32 = 300;

/// Terminal outcome of querying one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Response received and parsed.
    Success,
    /// The per-leader fan-out budget elapsed (or the caller cancelled).
    TimedOut,
    /// The server answered with a failure response.
    ServerFailureResponse,
    /// Transport-level failure talking to the server.
    RequestException,
    /// Outcome unknown: an upstream leader failed before reporting it.
    FederationError,
}

/// Per-server outcome of one fan-out cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub server: ServerInfo,
    pub status: RequestStatus,
    #[serde(default)]
    pub http_response_code: i16,
    #[serde(default)]
    pub message: String,
}

impl RequestDetails {
    pub fn new(server: ServerInfo, status: RequestStatus) -> Self {
        Self {
            server,
            status,
            http_response_code: 0,
            message: String::new(),
        }
    }
}

/// The value carried by one sample, tagged by counter kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleValue {
    HitCount(HitCount),
    Histogram(Histogram),
}

impl SampleValue {
    pub fn kind(&self) -> DataKind {
        match self {
            Self::HitCount(_) => DataKind::HitCount,
            Self::Histogram(_) => DataKind::Histogram,
        }
    }

    /// Type-dependent merge: hit counts add, histograms sum per bucket.
    /// Mismatched kinds keep `self` untouched.
    pub fn merge(&mut self, other: &SampleValue) {
        match (self, other) {
            (Self::HitCount(a), Self::HitCount(b)) => a.merge(b),
            (Self::Histogram(a), Self::Histogram(b)) => a.merge(b),
            (a, b) => {
                warn!(
                    left = %a.kind(),
                    right = %b.kind(),
                    "dropping sample merge across mismatched value kinds",
                );
            }
        }
    }
}

/// One time-bucketed observation of a counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSample {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    pub value: SampleValue,
}

impl DataSample {
    fn merge_key(&self) -> (DateTime<Utc>, DateTime<Utc>, BTreeMap<String, String>) {
        (self.start, self.end, self.dimensions.clone())
    }
}

/// Folds `from` into `into`, combining samples that share
/// `(start, end, dimensions)` and appending the rest. Commutative and
/// associative over sample sets, so fan-out arrival order does not matter.
pub fn merge_samples(into: &mut Vec<DataSample>, from: impl IntoIterator<Item = DataSample>) {
    let mut index: HashMap<_, usize> = into
        .iter()
        .enumerate()
        .map(|(i, s)| (s.merge_key(), i))
        .collect();

    for sample in from {
        match index.entry(sample.merge_key()) {
            std::collections::hash_map::Entry::Occupied(o) => {
                let value = sample.value;
                into[*o.get()].value.merge(&value);
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(into.len());
                into.push(sample);
            }
        }
    }
}

/// Response to a counter data query, aggregated across the fan-out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterQueryResponse {
    #[serde(default)]
    pub samples: Vec<DataSample>,
    #[serde(default)]
    pub request_details: Vec<RequestDetails>,
    #[serde(default)]
    pub http_response_code: i16,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub user_context: String,
}

/// Description of one counter known to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterInfo {
    pub name: String,
    pub kind: DataKind,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Response to a counter info query. Carries the same per-server
/// accounting as [`CounterQueryResponse`]; the payload domain differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterInfoResponse {
    #[serde(default)]
    pub counters: Vec<CounterInfo>,
    #[serde(default)]
    pub request_details: Vec<RequestDetails>,
    #[serde(default)]
    pub http_response_code: i16,
    #[serde(default)]
    pub error_message: String,
}

/// Counter info entries deduplicate by name rather than sample-merge.
pub fn merge_counter_info(into: &mut Vec<CounterInfo>, from: impl IntoIterator<Item = CounterInfo>) {
    let mut seen: std::collections::HashSet<String> =
        into.iter().map(|c| c.name.clone()).collect();
    for info in from {
        if seen.insert(info.name.clone()) {
            into.push(info);
        }
    }
}

/// One sub-query of a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCounterQuery {
    pub counter_path: String,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    /// Correlation key; minted by the aggregator when empty.
    #[serde(default)]
    pub user_context: String,
}

/// A set of counter queries sharing one fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQueryRequest {
    pub sources: Vec<ServerInfo>,
    pub max_fanout: u32,
    pub fanout_timeout_ms: u32,
    #[serde(default)]
    pub include_request_diagnostics: bool,
    pub queries: Vec<BatchCounterQuery>,
}

/// Parallel responses to a [`BatchQueryRequest`], plus the shared
/// per-server accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchQueryResponse {
    #[serde(default)]
    pub responses: Vec<CounterQueryResponse>,
    #[serde(default)]
    pub request_details: Vec<RequestDetails>,
}
