//! Cluster topology computation.
//!
//! Given an offset, a base path, instance/shard counts and a base port, this
//! module derives every instance's ports, working directory and role. The
//! result is fully deterministic, so two harness runs with distinct offsets
//! never collide on ports or paths.
//!
//! The host table rendered from a [`Topology`] is the only coupling to the
//! cluster's own configuration format and must stay byte-stable.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use probe_types::{Instance, Ports, Role};
use thiserror::Error;

/// Port stride per offset step.
pub const DEFAULT_PORT_STRIDE: u16 = 10;

/// Port stride per offset step when running under a parallel CI executor.
pub const CI_PORT_STRIDE: u16 = 100;

/// Most instances one topology can hold. Each port kind sits 1000 ports
/// from the next, so a larger host id would land in another host's band.
pub const MAX_INSTANCES: u32 = 1000;

/// Loopback address written into both IP columns of the host table.
const LOOPBACK: &str = "127.0.0.1";

/// Errors that can occur while computing a topology.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// Zero instances requested
    #[error("at least one instance is required")]
    NoInstances,

    /// More instances than the port bands can keep apart
    #[error("{requested} instances requested, at most {max} are supported")]
    TooManyInstances {
        /// Requested instance count.
        requested: u32,
        /// Largest supported count.
        max: u32,
    },

    /// Zero shards requested
    #[error("at least one shard is required")]
    NoShards,

    /// Instances cannot be split evenly over shards
    #[error("{instances} instances cannot be split evenly over {shards} shards")]
    UnevenShards {
        /// Requested instance count.
        instances: u32,
        /// Requested shard count.
        shards: u32,
    },

    /// A derived port falls outside 1..=65535
    #[error("port band for host {host_id} does not fit in 1..=65535")]
    PortOutOfRange {
        /// Host whose ports overflowed.
        host_id: u32,
    },
}

/// Inputs to [`Topology::compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyParams {
    /// Run offset; distinct offsets give disjoint ports and paths.
    pub offset: u32,
    /// Directory under which `instances<NN>/` is laid out.
    pub base_path: PathBuf,
    /// Total instance count.
    pub num_instances: u32,
    /// Shard count; must divide `num_instances`.
    pub num_shards: u32,
    /// HTTP port of host 0 at offset 0.
    pub base_port: u16,
    /// Port distance between consecutive offsets.
    pub port_stride: u16,
}

impl Default for TopologyParams {
    fn default() -> Self {
        Self {
            offset: 0,
            base_path: PathBuf::from("."),
            num_instances: 1,
            num_shards: 1,
            base_port: 28000,
            port_stride: DEFAULT_PORT_STRIDE,
        }
    }
}

/// A computed cluster layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    offset: u32,
    instances: Vec<Instance>,
    num_shards: u32,
    num_mirrors: u32,
    merge_path: PathBuf,
    lock_path: PathBuf,
}

impl Topology {
    /// Compute the topology for the given parameters.
    pub fn compute(params: &TopologyParams) -> Result<Self, TopologyError> {
        if params.num_instances == 0 {
            return Err(TopologyError::NoInstances);
        }
        if params.num_instances > MAX_INSTANCES {
            return Err(TopologyError::TooManyInstances {
                requested: params.num_instances,
                max: MAX_INSTANCES,
            });
        }
        if params.num_shards == 0 {
            return Err(TopologyError::NoShards);
        }
        if params.num_instances % params.num_shards != 0 {
            return Err(TopologyError::UnevenShards {
                instances: params.num_instances,
                shards: params.num_shards,
            });
        }

        let num_mirrors = params.num_instances / params.num_shards - 1;
        let root = instances_root(&params.base_path, params.offset);
        let band = i64::from(params.base_port)
            + i64::from(params.offset) * i64::from(params.port_stride);

        let instances = (0..params.num_instances)
            .map(|host_id| {
                let role = if num_mirrors == 0 {
                    Role::None
                } else if host_id < params.num_shards {
                    Role::SpiderOnly
                } else {
                    Role::QueryOnly
                };

                Ok(Instance {
                    host_id,
                    path: root.join(format!("{:03}", host_id)),
                    ports: port_band(band + i64::from(host_id), host_id)?,
                    role,
                })
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;

        Ok(Self {
            offset: params.offset,
            instances,
            num_shards: params.num_shards,
            num_mirrors,
            merge_path: root.join("merge"),
            lock_path: root.join("lock"),
        })
    }

    /// Run offset this topology was computed for.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// All instances, ordered by host id.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Number of shards.
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Number of mirrors per shard.
    pub fn num_mirrors(&self) -> u32 {
        self.num_mirrors
    }

    /// Shared merge directory.
    pub fn merge_path(&self) -> &Path {
        &self.merge_path
    }

    /// Shared lock directory.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Directory lifecycle commands run in and the host table lives in:
    /// host 0's instance directory.
    pub fn control_path(&self) -> &Path {
        &self.instances[0].path
    }

    /// The instance that spiders each shard: host ids `0..num_shards`.
    pub fn shard_instances(&self) -> &[Instance] {
        &self.instances[..self.num_shards as usize]
    }

    /// The instance searches are sent to: the first one not flagged spider-only.
    pub fn query_instance(&self) -> &Instance {
        self.instances
            .iter()
            .find(|i| i.role != Role::SpiderOnly)
            .unwrap_or(&self.instances[0])
    }

    /// Render the host table consumed by the cluster binary.
    ///
    /// One header line, then one space-separated line per instance. The role
    /// column is omitted entirely when the instance has no role.
    pub fn host_table(&self) -> String {
        let mut out = format!("num-mirrors: {}\n", self.num_mirrors);
        for instance in &self.instances {
            let _ = write!(
                out,
                "{} {} {} {} {} {} {} {} {} {}",
                instance.host_id,
                instance.ports.dns,
                instance.ports.https,
                instance.ports.http,
                instance.ports.udp,
                LOOPBACK,
                LOOPBACK,
                instance.path.display(),
                self.merge_path.display(),
                self.lock_path.display(),
            );
            if let Some(flag) = instance.role.host_table_flag() {
                out.push(' ');
                out.push_str(flag);
            }
            out.push('\n');
        }
        out
    }
}

fn instances_root(base_path: &Path, offset: u32) -> PathBuf {
    base_path.join(format!("instances{:02}", offset))
}

fn port_band(http: i64, host_id: u32) -> Result<Ports, TopologyError> {
    let port = |p: i64| {
        u16::try_from(p)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(TopologyError::PortOutOfRange { host_id })
    };

    Ok(Ports {
        dns: port(http - 2000)?,
        https: port(http - 1000)?,
        http: port(http)?,
        udp: port(http + 1000)?,
    })
}
