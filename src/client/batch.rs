//! Aggregation of batch query responses by user context.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::query::{
    merge_samples, BatchQueryRequest, BatchQueryResponse, CounterQueryResponse, RequestDetails,
};

use super::error::{Error, Result};

const RESERVED_PERCENTILE: &str = "percentile";

pub(crate) fn is_reserved_param(name: &str) -> bool {
    name.eq_ignore_ascii_case(RESERVED_PERCENTILE)
}

/// Merges batch query responses into one response per requested sub-query.
///
/// Construction fixes up the supplied request: reserved query parameters
/// are stripped and every sub-query without a user context gets a fresh
/// unique one. Responses are then keyed by that context; a response whose
/// context matches no sub-query is discarded.
#[derive(Debug)]
pub struct BatchResponseAggregator {
    order: Vec<String>,
    responses: HashMap<String, CounterQueryResponse>,
    details: Vec<RequestDetails>,
}

impl BatchResponseAggregator {
    pub fn new(request: &mut BatchQueryRequest) -> Result<Self> {
        if request.queries.is_empty() {
            return Err(Error::InvalidArgument(
                "batch request carries no queries".to_owned(),
            ));
        }

        let mut order = Vec::with_capacity(request.queries.len());
        let mut responses = HashMap::with_capacity(request.queries.len());
        for query in &mut request.queries {
            query.query_params.retain(|name, _| !is_reserved_param(name));
            if query.user_context.is_empty() {
                query.user_context = Uuid::new_v4().to_string();
            }

            order.push(query.user_context.clone());
            responses.insert(
                query.user_context.clone(),
                CounterQueryResponse {
                    user_context: query.user_context.clone(),
                    ..Default::default()
                },
            );
        }

        Ok(Self {
            order,
            responses,
            details: Vec::new(),
        })
    }

    /// Folds one batch response into the aggregate.
    pub fn absorb(&mut self, response: BatchQueryResponse) {
        self.details.extend(response.request_details);

        for sub in response.responses {
            match self.responses.get_mut(&sub.user_context) {
                Some(kept) => {
                    merge_samples(&mut kept.samples, sub.samples);
                    if kept.http_response_code == 0 {
                        kept.http_response_code = sub.http_response_code;
                    }
                    if kept.error_message.is_empty() {
                        kept.error_message = sub.error_message;
                    }
                }
                None => {
                    debug!(
                        user_context = sub.user_context.as_str(),
                        "discarding batch response for unknown counter",
                    );
                }
            }
        }
    }

    /// One entry per requested sub-query, in request order. Sub-queries
    /// that received no data keep an empty sample list.
    pub fn into_response(mut self) -> BatchQueryResponse {
        let responses = self
            .order
            .iter()
            .map(|context| self.responses.remove(context).unwrap_or_default())
            .collect();

        BatchQueryResponse {
            responses,
            request_details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{BatchCounterQuery, ServerInfo};

    use super::*;

    fn request(queries: Vec<BatchCounterQuery>) -> BatchQueryRequest {
        BatchQueryRequest {
            sources: vec![ServerInfo::new("a", 4200)],
            max_fanout: 2,
            fanout_timeout_ms: 100,
            include_request_diagnostics: true,
            queries,
        }
    }

    fn query(path: &str, context: &str) -> BatchCounterQuery {
        BatchCounterQuery {
            counter_path: path.to_owned(),
            query_params: HashMap::new(),
            user_context: context.to_owned(),
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = BatchResponseAggregator::new(&mut request(vec![])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn missing_user_context_is_minted() {
        let mut req = request(vec![query("/a", ""), query("/b", "")]);
        BatchResponseAggregator::new(&mut req).unwrap();

        assert!(!req.queries[0].user_context.is_empty());
        assert!(!req.queries[1].user_context.is_empty());
        assert_ne!(req.queries[0].user_context, req.queries[1].user_context);
    }

    #[test]
    fn percentile_params_are_stripped_case_insensitively() {
        let mut q = query("/a", "ctx");
        q.query_params.insert("Percentile".to_owned(), "99".to_owned());
        q.query_params.insert("dimension".to_owned(), "host".to_owned());
        let mut req = request(vec![q]);
        BatchResponseAggregator::new(&mut req).unwrap();

        assert!(!req.queries[0].query_params.contains_key("Percentile"));
        assert!(req.queries[0].query_params.contains_key("dimension"));
    }

    #[test]
    fn unknown_context_is_discarded() {
        let mut req = request(vec![query("/a", "ctx-a")]);
        let mut aggregator = BatchResponseAggregator::new(&mut req).unwrap();

        aggregator.absorb(BatchQueryResponse {
            responses: vec![CounterQueryResponse {
                user_context: "nobody".to_owned(),
                ..Default::default()
            }],
            request_details: vec![],
        });

        let response = aggregator.into_response();
        assert_eq!(response.responses.len(), 1);
        assert!(response.responses[0].samples.is_empty());
    }
}
