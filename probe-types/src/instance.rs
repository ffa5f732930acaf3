//! Cluster instance descriptors.

use std::path::PathBuf;

/// Spider/query split of an instance in a mirrored deployment.
///
/// The two flags are mutually exclusive and written verbatim into the
/// cluster's host table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// No split; the instance both spiders and answers queries.
    #[default]
    None,
    /// Shard primary that spiders but is not queried directly.
    SpiderOnly,
    /// Mirror that answers queries and never spiders.
    QueryOnly,
}

impl Role {
    /// Flag token for the host table, `None` when the column is omitted.
    pub fn host_table_flag(self) -> Option<&'static str> {
        match self {
            Role::None => None,
            Role::SpiderOnly => Some("spider-only"),
            Role::QueryOnly => Some("query-only"),
        }
    }
}

/// Port band of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ports {
    /// DNS client port.
    pub dns: u16,
    /// HTTPS admin/query port.
    pub https: u16,
    /// HTTP admin/query port.
    pub http: u16,
    /// Inter-host UDP port.
    pub udp: u16,
}

/// One computed cluster instance. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Host id, also the line index in the host table.
    pub host_id: u32,
    /// Working directory of the instance.
    pub path: PathBuf,
    /// Port band.
    pub ports: Ports,
    /// Spider/query role.
    pub role: Role,
}

impl Instance {
    /// The HTTP port, which is the one the admin API listens on.
    pub fn port(&self) -> u16 {
        self.ports.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_flags() {
        assert_eq!(Role::None.host_table_flag(), None);
        assert_eq!(Role::SpiderOnly.host_table_flag(), Some("spider-only"));
        assert_eq!(Role::QueryOnly.host_table_flag(), Some("query-only"));
    }

    #[test]
    fn role_default_is_none() {
        assert_eq!(Role::default(), Role::None);
    }
}
