//! Fan-out behavior of the distributed query client under partial failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use rmetrics::client::{ClientBuilder, DistributedQueryClient, Error};
use rmetrics::data::HitCount;
use rmetrics::query::{
    CounterInfo, CounterInfoResponse, CounterQueryResponse, DataSample, RequestDetails,
    RequestStatus, SampleValue, ServerInfo, TieredRequest,
};
use rmetrics::transport::{HttpRequest, HttpResponse, Requester, TransportError};

const PORT: u16 = 4200;

fn fleet() -> Vec<ServerInfo> {
    "abcdefghij"
        .chars()
        .map(|c| ServerInfo::new(c.to_string(), PORT))
        .collect()
}

fn tiered(sources: Vec<ServerInfo>, max_fanout: u32) -> TieredRequest {
    TieredRequest {
        sources,
        max_fanout,
        fanout_timeout_ms: 100,
        include_request_diagnostics: true,
        payload: serde_json::Value::Null,
    }
}

/// How the mock answers every leader request.
#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Transport drops the connection.
    ConnectionClosed,
    /// Transport reports a timeout.
    Timeout,
    /// Never answers; only the caller's budget ends the request.
    Hang,
    /// HTTP failure, optionally with a parseable body that marks every
    /// delegated source as a transport failure.
    HttpFailure { code: u16, parseable: bool },
    /// Simulates a well-behaved leader: every machine in its closure
    /// contributes one hit to each of ten buckets.
    Healthy,
    /// Counter info endpoint: reports one counter, with per-source
    /// accounting.
    HealthyInfo,
}

#[derive(Debug)]
struct MockRequester {
    behavior: Behavior,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockRequester {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn uris(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.uri.clone())
            .collect()
    }

    fn leader(&self, request: &HttpRequest) -> ServerInfo {
        let rest = request.uri.strip_prefix("http://").unwrap();
        let host = rest.split(':').next().unwrap();
        ServerInfo::new(host, PORT)
    }

    fn delegated(&self, request: &HttpRequest) -> Vec<ServerInfo> {
        let tiered: TieredRequest = serde_json::from_slice(&request.body).unwrap();
        tiered.sources
    }
}

fn buckets(hits: u64) -> Vec<DataSample> {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    (0..10)
        .map(|i| {
            let start = base + chrono::Duration::minutes(i);
            DataSample {
                start,
                end: start + chrono::Duration::minutes(1),
                dimensions: BTreeMap::new(),
                value: SampleValue::HitCount(HitCount::new(hits)),
            }
        })
        .collect()
}

#[async_trait]
impl Requester for MockRequester {
    async fn submit(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        match self.behavior {
            Behavior::ConnectionClosed => Err(TransportError::ConnectionClosed),
            Behavior::Timeout => Err(TransportError::Timeout),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(TransportError::Timeout)
            }
            Behavior::HttpFailure { code, parseable } => {
                let body = if parseable {
                    let response = CounterQueryResponse {
                        request_details: self
                            .delegated(&request)
                            .into_iter()
                            .map(|server| {
                                RequestDetails::new(server, RequestStatus::RequestException)
                            })
                            .collect(),
                        http_response_code: code as i16,
                        ..Default::default()
                    };
                    serde_json::to_vec(&response).unwrap()
                } else {
                    b"not a response body".to_vec()
                };
                Ok(HttpResponse { status: code, body })
            }
            Behavior::Healthy => {
                let leader = self.leader(&request);
                let delegated = self.delegated(&request);
                let contributors = 1 + delegated.len() as u64;

                let mut details = vec![RequestDetails::new(leader, RequestStatus::Success)];
                details.extend(
                    delegated
                        .into_iter()
                        .map(|server| RequestDetails::new(server, RequestStatus::Success)),
                );
                let response = CounterQueryResponse {
                    samples: buckets(contributors),
                    request_details: details,
                    http_response_code: 200,
                    ..Default::default()
                };
                Ok(HttpResponse {
                    status: 200,
                    body: serde_json::to_vec(&response).unwrap(),
                })
            }
            Behavior::HealthyInfo => {
                let leader = self.leader(&request);
                let delegated = self.delegated(&request);

                let mut details = vec![RequestDetails::new(leader, RequestStatus::Success)];
                details.extend(
                    delegated
                        .into_iter()
                        .map(|server| RequestDetails::new(server, RequestStatus::Success)),
                );
                let response = CounterInfoResponse {
                    counters: vec![CounterInfo {
                        name: "/requests".to_owned(),
                        kind: rmetrics::data::DataKind::HitCount,
                        dimensions: vec!["host".to_owned()],
                        start: None,
                        end: None,
                    }],
                    request_details: details,
                    http_response_code: 200,
                    ..Default::default()
                };
                Ok(HttpResponse {
                    status: 200,
                    body: serde_json::to_vec(&response).unwrap(),
                })
            }
        }
    }
}

fn client(requester: Arc<MockRequester>) -> DistributedQueryClient {
    ClientBuilder::new().requester(requester).build()
}

fn count_status(details: &[RequestDetails], status: RequestStatus) -> usize {
    details.iter().filter(|d| d.status == status).count()
}

#[tokio::test]
async fn transport_exceptions_mark_leaders_and_federate_the_rest() {
    let requester = MockRequester::new(Behavior::ConnectionClosed);
    let client = client(Arc::clone(&requester));

    let response = client
        .counter_query("/requests", &tiered(fleet(), 2), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.request_details.len(), 10);
    assert_eq!(
        count_status(&response.request_details, RequestStatus::RequestException),
        2
    );
    assert_eq!(
        count_status(&response.request_details, RequestStatus::FederationError),
        8
    );
    assert!(response.samples.is_empty());
    assert_eq!(response.http_response_code, 500);
}

#[tokio::test]
async fn transport_timeouts_mark_leaders_timed_out() {
    let requester = MockRequester::new(Behavior::Timeout);
    let client = client(requester);

    let response = client
        .counter_query("/requests", &tiered(fleet(), 2), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(count_status(&response.request_details, RequestStatus::TimedOut), 2);
    assert_eq!(
        count_status(&response.request_details, RequestStatus::FederationError),
        8
    );
}

#[tokio::test]
async fn slow_leaders_hit_the_fanout_budget() {
    let requester = MockRequester::new(Behavior::Hang);
    let client = client(requester);

    let response = client
        .counter_query("/requests", &tiered(fleet(), 2), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(count_status(&response.request_details, RequestStatus::TimedOut), 2);
    assert_eq!(
        count_status(&response.request_details, RequestStatus::FederationError),
        8
    );
}

#[tokio::test]
async fn http_failure_without_body_marks_only_leaders() {
    let requester = MockRequester::new(Behavior::HttpFailure {
        code: 402,
        parseable: false,
    });
    let client = client(requester);

    let response = client
        .counter_query("/requests", &tiered(fleet(), 2), None, &CancellationToken::new())
        .await
        .unwrap();

    let failures: Vec<_> = response
        .request_details
        .iter()
        .filter(|d| d.status == RequestStatus::ServerFailureResponse)
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|d| d.http_response_code == 402));
    assert_eq!(
        count_status(&response.request_details, RequestStatus::FederationError),
        8
    );
}

#[tokio::test]
async fn http_failure_with_body_donates_sub_source_statuses() {
    let requester = MockRequester::new(Behavior::HttpFailure {
        code: 402,
        parseable: true,
    });
    let client = client(requester);

    let response = client
        .counter_query("/requests", &tiered(fleet(), 1), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.request_details.len(), 10);
    let failures: Vec<_> = response
        .request_details
        .iter()
        .filter(|d| d.status == RequestStatus::ServerFailureResponse)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].http_response_code, 402);
    assert_eq!(
        count_status(&response.request_details, RequestStatus::RequestException),
        9
    );
}

#[tokio::test]
async fn healthy_fleet_merges_every_contribution() {
    let requester = MockRequester::new(Behavior::Healthy);
    let client = client(requester);

    let response = client
        .counter_query("/requests", &tiered(fleet(), 2), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.http_response_code, 200);
    assert_eq!(count_status(&response.request_details, RequestStatus::Success), 10);

    assert_eq!(response.samples.len(), 10);
    for sample in &response.samples {
        assert_eq!(sample.value, SampleValue::HitCount(HitCount::new(10)));
    }
}

#[tokio::test]
async fn every_server_appears_exactly_once_in_details() {
    let requester = MockRequester::new(Behavior::Healthy);
    let client = client(requester);
    let sources = fleet();

    let response = client
        .counter_query("/requests", &tiered(sources.clone(), 3), None, &CancellationToken::new())
        .await
        .unwrap();

    let mut seen: Vec<_> = response
        .request_details
        .iter()
        .map(|d| d.server.clone())
        .collect();
    seen.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    let mut expected = sources;
    expected.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn uris_have_the_documented_shape() {
    let requester = MockRequester::new(Behavior::Healthy);
    let client = client(Arc::clone(&requester));
    let sources = vec![ServerInfo::new("unit", PORT)];

    client
        .counter_query("/requests/latency", &tiered(sources, 2), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        requester.uris(),
        vec!["http://unit:4200/counters/requests/latency/query".to_owned()],
    );
}

#[tokio::test]
async fn percentile_params_never_reach_the_wire() {
    let requester = MockRequester::new(Behavior::Healthy);
    let client = client(Arc::clone(&requester));
    let sources = vec![ServerInfo::new("unit", PORT)];

    let params = HashMap::from([
        ("Percentile".to_owned(), "99.9".to_owned()),
        ("host".to_owned(), "web01".to_owned()),
    ]);
    client
        .counter_query("/requests", &tiered(sources, 2), Some(&params), &CancellationToken::new())
        .await
        .unwrap();

    let uris = requester.uris();
    assert_eq!(uris, vec!["http://unit:4200/counters/requests/query?host=web01".to_owned()]);
    assert!(!uris[0].to_lowercase().contains("percentile"));
}

#[tokio::test]
async fn cancellation_reports_timed_out() {
    let requester = MockRequester::new(Behavior::Hang);
    let client = client(requester);
    let cancel = CancellationToken::new();

    let tiered_query = tiered(fleet(), 2);
    let pending = client.counter_query("/requests", &tiered_query, None, &cancel);
    let cancelled = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    };
    let (response, ()) = tokio::join!(pending, cancelled);

    let response = response.unwrap();
    assert_eq!(count_status(&response.request_details, RequestStatus::TimedOut), 2);
}

#[tokio::test]
async fn counter_info_rides_the_same_fanout() {
    let requester = MockRequester::new(Behavior::HealthyInfo);
    let client = client(Arc::clone(&requester));

    let response = client
        .counter_info_query("/requests", &tiered(fleet(), 2), None, &CancellationToken::new())
        .await
        .unwrap();

    // the same counter reported by both leaders appears once
    assert_eq!(response.counters.len(), 1);
    assert_eq!(response.counters[0].name, "/requests");
    assert_eq!(count_status(&response.request_details, RequestStatus::Success), 10);
    assert!(requester.uris().iter().all(|uri| uri.ends_with("/info")));
}

#[tokio::test]
async fn diagnostics_can_be_suppressed() {
    let requester = MockRequester::new(Behavior::Healthy);
    let client = client(requester);

    let mut request = tiered(fleet(), 2);
    request.include_request_diagnostics = false;
    let response = client
        .counter_query("/requests", &request, None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(response.request_details.is_empty());
    assert_eq!(response.samples.len(), 10);
}

#[tokio::test]
async fn bad_arguments_fail_synchronously() {
    let requester = MockRequester::new(Behavior::Healthy);
    let client = client(Arc::clone(&requester));
    let cancel = CancellationToken::new();

    let err = client
        .counter_query("", &tiered(fleet(), 2), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = client
        .counter_query("requests", &tiered(fleet(), 2), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = client
        .counter_query("/requests", &tiered(fleet(), 0), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // nothing was submitted
    assert!(requester.uris().is_empty());
}
