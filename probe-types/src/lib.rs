//! # probe-types
//!
//! Wire and record types for the crawlprobe cluster test harness.
//!
//! This crate provides the foundational types used across all crawlprobe crates:
//! - [`ApiResponse`], [`Sentinel`] - Admin API responses, including the two synthetic ones
//! - [`Instance`], [`Role`], [`Ports`] - One entry of the cluster host table
//! - [`SpiderQueueSnapshot`] - Spider queue state polled while waiting for crawls to drain
//! - [`TestRecord`], [`TestSuite`] - Pass/fail records collected for the report

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod instance;
mod record;
mod response;
mod snapshot;

pub use error::ResponseError;
pub use instance::{Instance, Ports, Role};
pub use record::{TestRecord, TestSuite};
pub use response::{ApiResponse, Sentinel, STATUS_OK};
pub use snapshot::{SpiderQueueSnapshot, WaitingTree, STATUS_STARTING, STATUS_STEADY};
