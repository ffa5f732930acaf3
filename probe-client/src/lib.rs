//! # probe-client
//!
//! Admin API client for the crawlprobe cluster test harness.
//!
//! ## Features
//!
//! - **Transport Abstraction**: Pluggable transport layer (hyper, mock)
//! - **Base Parameters**: `c=main&format=json&showinput=0` composed into every call
//! - **Sentinel Normalization**: the two outcomes the cluster reports through a
//!   broken status line come back as ordinary responses
//! - **Liveness**: `processStartTime` fingerprints to spot unplanned restarts
//!
//! ## Example
//!
//! ```ignore
//! use probe_client::{ApiClient, HttpTransport};
//!
//! let client = ApiClient::new(HttpTransport::new("127.0.0.1", 28000)?);
//! client.config_sitelist("http://a.case1.privacore.test:28080/").await?;
//! let response = client.search("case1", &[]).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod liveness;
pub mod transport;

pub use api::{ApiClient, ApiError, BaseParams, INJECT_SETTLE};
pub use liveness::{Liveness, ProcessLiveness};
pub use transport::{HttpTransport, MockReply, MockTransport, RawResponse, Request, Transport, TransportError};
