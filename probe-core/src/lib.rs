//! # probe-core
//!
//! Pure logic for crawlprobe (no I/O, instant tests).
//!
//! This crate implements the computations and state machines the harness
//! is built on, without any network, process or disk I/O:
//!
//! - [`topology`] - per-instance ports, paths and roles, plus the host table
//! - [`ids`] - probable doc ids and site hashes re-derived from URLs
//! - [`poller`] - the per-shard completion state machine
//! - [`instruction`] - script tokenizing, natural ordering, the action registry
//! - [`literal`] - pipe-delimited expectation grammars
//! - [`report`] - the report sink
//!
//! ## Design Philosophy
//!
//! Everything here is **pure**: the caller performs the I/O (HTTP calls,
//! sleeps, file reads) in `probe-client` and `crawlprobe`, and feeds the
//! results in. Tests need no mocks and no runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ids;
pub mod instruction;
pub mod literal;
pub mod poller;
pub mod report;
pub mod topology;

pub use ids::{probable_doc_id, probable_doc_id_with, site_hash32, site_hash32_with, Blake3Hasher, IdHasher};
pub use instruction::{natural_cmp, natural_sort, parse_script, ActionSpec, Instruction, Registry, RegistryError};
pub use literal::{FormatError, Placeholders, SearchQuery};
pub use poller::{CompletionPoller, Observation, PollState, PollerConfig};
pub use report::{ReportSink, Summary};
pub use topology::{Topology, TopologyError, TopologyParams, CI_PORT_STRIDE, DEFAULT_PORT_STRIDE, MAX_INSTANCES};
