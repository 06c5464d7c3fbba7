//! Distributed query client.
//!
//! Issues tiered fan-out queries against a fleet of metric servers and
//! merges the partial responses, accounting for every server exactly once
//! in the returned [`RequestDetails`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fanout::{self, FanoutSlice};
use crate::query::{
    merge_counter_info, merge_samples, BatchQueryRequest, BatchQueryResponse, CounterInfoResponse,
    CounterQueryResponse, RequestDetails, RequestStatus, ServerInfo, TieredRequest,
};
use crate::transport::{HttpRequest, Requester, ReqwestRequester, TransportError};

pub mod batch;
pub mod error;

pub use batch::BatchResponseAggregator;
pub use error::{Error, Result};

use batch::is_reserved_param;

/// Builder for [`DistributedQueryClient`].
#[derive(Default)]
pub struct ClientBuilder {
    requester: Option<Arc<dyn Requester>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the transport. Tests inject mock requesters here instead
    /// of mutating process-wide state.
    pub fn requester(mut self, requester: Arc<dyn Requester>) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn build(self) -> DistributedQueryClient {
        DistributedQueryClient {
            requester: self
                .requester
                .unwrap_or_else(|| Arc::new(ReqwestRequester::new())),
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder").finish_non_exhaustive()
    }
}

/// Client for tiered counter queries across a server fleet.
///
/// Every remote failure is folded into per-server statuses on the
/// response; the async operations only fail for invalid arguments or
/// truly unexpected errors.
#[derive(Debug)]
pub struct DistributedQueryClient {
    requester: Arc<dyn Requester>,
}

/// Aggregate shape shared by the fan-out response kinds.
trait FanoutResponse: DeserializeOwned + Default + Send {
    const ENDPOINT: &'static str;

    fn take_request_details(&mut self) -> Vec<RequestDetails>;

    /// Folds another successful response's payload into this aggregate.
    fn fold_payload(&mut self, other: Self);

    fn finish(&mut self, code: i16, message: String, details: Vec<RequestDetails>);
}

impl FanoutResponse for CounterQueryResponse {
    const ENDPOINT: &'static str = "query";

    fn take_request_details(&mut self) -> Vec<RequestDetails> {
        std::mem::take(&mut self.request_details)
    }

    fn fold_payload(&mut self, other: Self) {
        merge_samples(&mut self.samples, other.samples);
    }

    fn finish(&mut self, code: i16, message: String, details: Vec<RequestDetails>) {
        self.http_response_code = code;
        self.error_message = message;
        self.request_details = details;
    }
}

impl FanoutResponse for CounterInfoResponse {
    const ENDPOINT: &'static str = "info";

    fn take_request_details(&mut self) -> Vec<RequestDetails> {
        std::mem::take(&mut self.request_details)
    }

    fn fold_payload(&mut self, other: Self) {
        merge_counter_info(&mut self.counters, other.counters);
    }

    fn finish(&mut self, code: i16, message: String, details: Vec<RequestDetails>) {
        self.http_response_code = code;
        self.error_message = message;
        self.request_details = details;
    }
}

/// What one leader request produced, before folding into the aggregate.
struct LeaderOutcome<T> {
    status: RequestStatus,
    http_response_code: i16,
    message: String,
    /// Details reported by the leader for its delegated sources.
    sub_details: Vec<RequestDetails>,
    /// Parsed payload, present only on success.
    payload: Option<T>,
}

impl DistributedQueryClient {
    /// Queries counter data across the request's sources.
    pub async fn counter_query(
        &self,
        counter_path: &str,
        request: &TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<CounterQueryResponse> {
        self.fan_out::<CounterQueryResponse>(counter_path, request, query_params, cancel)
            .await
    }

    /// Queries counter metadata across the request's sources.
    pub async fn counter_info_query(
        &self,
        counter_path: &str,
        request: &TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<CounterInfoResponse> {
        self.fan_out::<CounterInfoResponse>(counter_path, request, query_params, cancel)
            .await
    }

    /// Runs one counter query per batch sub-query and aggregates the
    /// responses by user context.
    pub async fn batch_query(
        &self,
        mut request: BatchQueryRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchQueryResponse> {
        let mut aggregator = BatchResponseAggregator::new(&mut request)?;

        let tiered = TieredRequest {
            sources: request.sources.clone(),
            max_fanout: request.max_fanout,
            fanout_timeout_ms: request.fanout_timeout_ms,
            include_request_diagnostics: request.include_request_diagnostics,
            payload: serde_json::Value::Null,
        };

        let queries = request.queries.iter().map(|query| async {
            let response = self
                .counter_query(
                    &query.counter_path,
                    &tiered,
                    Some(&query.query_params),
                    cancel,
                )
                .await?;
            Ok::<_, Error>((query.user_context.clone(), response))
        });

        for result in join_all(queries).await {
            let (user_context, mut response) = result?;
            response.user_context = user_context;
            aggregator.absorb(BatchQueryResponse {
                request_details: response.request_details.clone(),
                responses: vec![response],
            });
        }

        Ok(aggregator.into_response())
    }

    async fn fan_out<T: FanoutResponse>(
        &self,
        counter_path: &str,
        request: &TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        validate_counter_path(counter_path)?;
        if request.max_fanout == 0 {
            return Err(Error::InvalidArgument(
                "max_fanout must be at least 1".to_owned(),
            ));
        }

        let plan = fanout::plan(&request.sources, request.max_fanout);
        debug!(
            counter_path,
            sources = request.sources.len(),
            leaders = plan.len(),
            "fanning out",
        );

        // Until a leader reports otherwise, every source's outcome is
        // unknown.
        let mut details: HashMap<ServerInfo, RequestDetails> = request
            .sources
            .iter()
            .map(|server| {
                (
                    server.clone(),
                    RequestDetails::new(server.clone(), RequestStatus::FederationError),
                )
            })
            .collect();

        let budget = Duration::from_millis(u64::from(request.fanout_timeout_ms));
        let leads = plan.slices.iter().map(|slice| {
            self.lead_request::<T>(counter_path, request, query_params, slice, budget, cancel)
        });
        let outcomes = join_all(leads).await;

        let mut aggregate = T::default();
        let mut successes = 0usize;
        for (slice, outcome) in plan.slices.iter().zip(outcomes) {
            let outcome = outcome?;

            // A parseable body speaks for the leader's delegated sources;
            // the leader's own slot is ours to write.
            for detail in outcome.sub_details {
                if detail.server == slice.leader {
                    continue;
                }
                if let Some(slot) = details.get_mut(&detail.server) {
                    *slot = detail;
                }
            }
            if let Some(slot) = details.get_mut(&slice.leader) {
                *slot = RequestDetails {
                    server: slice.leader.clone(),
                    status: outcome.status,
                    http_response_code: outcome.http_response_code,
                    message: outcome.message,
                };
            }

            if let Some(payload) = outcome.payload {
                aggregate.fold_payload(payload);
                successes += 1;
            }
        }

        let reported = if request.include_request_diagnostics {
            details.into_values().collect()
        } else {
            Vec::new()
        };
        let (code, message) = if successes > 0 || plan.is_empty() {
            (200, String::new())
        } else {
            (500, "no leader responded successfully".to_owned())
        };
        aggregate.finish(code, message, reported);
        Ok(aggregate)
    }

    async fn lead_request<T: FanoutResponse>(
        &self,
        counter_path: &str,
        request: &TieredRequest,
        query_params: Option<&HashMap<String, String>>,
        slice: &FanoutSlice,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<LeaderOutcome<T>> {
        let uri = build_uri(&slice.leader, counter_path, T::ENDPOINT, query_params);
        let delegated = TieredRequest {
            sources: slice.delegated.clone(),
            max_fanout: request.max_fanout,
            fanout_timeout_ms: request.fanout_timeout_ms,
            include_request_diagnostics: request.include_request_diagnostics,
            payload: request.payload.clone(),
        };
        let body = serde_json::to_vec(&delegated)?;

        let mut http_request = HttpRequest::new(uri);
        http_request.body = body;

        let submitted = self.requester.submit(http_request);
        let result = tokio::select! {
            // Cancelled leaders report as timed out.
            _ = cancel.cancelled() => Err(TransportError::Timeout),
            outcome = tokio::time::timeout(budget, submitted) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(TransportError::Timeout),
            },
        };

        let outcome = match result {
            Ok(response) if response.is_success() => {
                match serde_json::from_slice::<T>(&response.body) {
                    Ok(mut parsed) => LeaderOutcome {
                        status: RequestStatus::Success,
                        http_response_code: as_code(response.status),
                        message: String::new(),
                        sub_details: parsed.take_request_details(),
                        payload: Some(parsed),
                    },
                    Err(e) => {
                        warn!(leader = %slice.leader, error = %e, "unreadable success body");
                        LeaderOutcome {
                            status: RequestStatus::RequestException,
                            http_response_code: as_code(response.status),
                            message: "response body could not be parsed".to_owned(),
                            sub_details: Vec::new(),
                            payload: None,
                        }
                    }
                }
            }
            Ok(response) => {
                // Failure responses may still carry per-source accounting
                // from the leader's own fan-out.
                let sub_details = serde_json::from_slice::<T>(&response.body)
                    .map(|mut parsed| parsed.take_request_details())
                    .unwrap_or_default();
                LeaderOutcome {
                    status: RequestStatus::ServerFailureResponse,
                    http_response_code: as_code(response.status),
                    message: String::new(),
                    sub_details,
                    payload: None,
                }
            }
            Err(TransportError::Timeout) => LeaderOutcome {
                status: RequestStatus::TimedOut,
                http_response_code: 0,
                message: String::new(),
                sub_details: Vec::new(),
                payload: None,
            },
            Err(e) => {
                debug!(leader = %slice.leader, error = %e, "leader request failed");
                LeaderOutcome {
                    status: RequestStatus::RequestException,
                    http_response_code: 0,
                    message: e.to_string(),
                    sub_details: Vec::new(),
                    payload: None,
                }
            }
        };

        Ok(outcome)
    }
}

fn validate_counter_path(counter_path: &str) -> Result<()> {
    if counter_path.is_empty() {
        return Err(Error::InvalidArgument(
            "counter path must not be empty".to_owned(),
        ));
    }
    if !counter_path.starts_with('/') {
        return Err(Error::InvalidArgument(format!(
            "counter path must begin with '/': {}",
            counter_path
        )));
    }
    Ok(())
}

fn build_uri(
    server: &ServerInfo,
    counter_path: &str,
    endpoint: &str,
    query_params: Option<&HashMap<String, String>>,
) -> String {
    let mut uri = format!(
        "http://{}:{}/counters{}/{}",
        server.hostname, server.port, counter_path, endpoint
    );
    if let Some(params) = query_params {
        let query = build_query_string(params);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&query);
        }
    }
    uri
}

fn build_query_string(params: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = params
        .iter()
        .filter(|(name, _)| !is_reserved_param(name))
        .collect();
    pairs.sort();

    let mut query = String::new();
    for (name, value) in pairs {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(name);
        query.push('=');
        query.push_str(value);
    }
    query
}

fn as_code(status: u16) -> i16 {
    i16::try_from(status).unwrap_or(i16::MAX)
}
