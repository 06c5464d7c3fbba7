//! A client library for a distributed metrics system.
//!
//! Two subsystems make up the core:
//!
//! * A **tiered query client** ([`client::DistributedQueryClient`]) that
//!   fans a counter query out across a fleet of metric servers through
//!   intermediate leaders, merges the partial responses, and accounts for
//!   every server exactly once even under partial failure.
//! * A **persisted data codec** ([`persist::PersistedDataWriter`] /
//!   [`persist::PersistedDataReader`]) that serialises dimensional counter
//!   data to versioned binary records and reads them back, including
//!   legacy-revision upgrade and truncation detection.
//!
//! # Example
//!
//! ```no_run
//! use rmetrics::client::ClientBuilder;
//! use rmetrics::query::{ServerInfo, TieredRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), rmetrics::client::Error> {
//! let client = ClientBuilder::new().build();
//! let request = TieredRequest::new(vec![
//!     ServerInfo::new("metrics01", 4200),
//!     ServerInfo::new("metrics02", 4200),
//! ]);
//!
//! let cancel = CancellationToken::new();
//! let response = client
//!     .counter_query("/requests/latency", &request, None, &cancel)
//!     .await?;
//! for detail in &response.request_details {
//!     println!("{}: {:?}", detail.server, detail.status);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

pub mod client;
pub mod data;
pub mod fanout;
pub mod persist;
pub mod query;
pub mod transport;
