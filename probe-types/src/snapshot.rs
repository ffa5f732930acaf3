//! Spider queue snapshot as reported by `admin/spiderdb`.

use serde::Deserialize;

/// `statusCode` while the spider subsystem is still initializing.
pub const STATUS_STARTING: i64 = 0;

/// `statusCode` once the spider loop is idle between crawl passes.
pub const STATUS_STEADY: i64 = 7;

/// One scheduled entry of the waiting tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingTree {
    /// Scheduled spider time, epoch milliseconds.
    pub spider_time: i64,
}

/// Spider queue state of one shard. Ephemeral; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpiderQueueSnapshot {
    /// Spider subsystem status.
    #[serde(default)]
    pub status_code: i64,
    /// Outstanding per-IP crawl permission slots.
    #[serde(default, rename = "doleIPCount")]
    pub dole_ip_count: u64,
    /// Requests currently being spidered.
    #[serde(default)]
    pub spider_count: u64,
    /// Entries scheduled for a future time.
    #[serde(default)]
    pub waiting_tree_count: u64,
    /// The scheduled entries themselves.
    #[serde(default)]
    pub waiting_trees: Vec<WaitingTree>,
}

impl SpiderQueueSnapshot {
    /// True when nothing is being crawled or throttled right now.
    pub fn is_quiet(&self) -> bool {
        self.status_code == STATUS_STEADY && self.dole_ip_count == 0 && self.spider_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_cluster_field_names() {
        let json = r#"{
            "statusCode": 7,
            "statusMsg": "Spider is idle",
            "doleIPCount": 0,
            "spiderCount": 0,
            "waitingTreeCount": 1,
            "waitingTrees": [{"spiderTime": 1700000000000, "firstIp": "127.0.0.1"}]
        }"#;
        let snapshot: SpiderQueueSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status_code, STATUS_STEADY);
        assert_eq!(snapshot.waiting_tree_count, 1);
        assert_eq!(snapshot.waiting_trees[0].spider_time, 1_700_000_000_000);
        assert!(snapshot.is_quiet());
    }

    #[test]
    fn missing_fields_default() {
        let snapshot: SpiderQueueSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot.status_code, STATUS_STARTING);
        assert!(snapshot.waiting_trees.is_empty());
        assert!(!snapshot.is_quiet());
    }

    #[test]
    fn busy_spider_is_not_quiet() {
        let snapshot = SpiderQueueSnapshot {
            status_code: STATUS_STEADY,
            spider_count: 2,
            ..Default::default()
        };
        assert!(!snapshot.is_quiet());
    }
}
