//! Append-only log of served URLs.

use std::sync::{Arc, Mutex, MutexGuard};

/// Every URL the fixture server answered, in arrival order.
///
/// Entries are only ever appended by the server. The harness owns the one
/// explicit [`clear`](ServedUrlLog::clear) boundary, called between test
/// cases before seeding.
#[derive(Debug, Clone, Default)]
pub struct ServedUrlLog {
    urls: Arc<Mutex<Vec<String>>>,
}

impl ServedUrlLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A poisoned log still holds valid URLs.
        self.urls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one served URL.
    pub fn record(&self, url: impl Into<String>) {
        self.lock().push(url.into());
    }

    /// Snapshot of every URL served since the last clear.
    pub fn served_urls(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// True when `url` was served since the last clear.
    pub fn contains(&self, url: &str) -> bool {
        self.lock().iter().any(|u| u == url)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing was served since the last clear.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every entry. Test-case boundary.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order_and_clears() {
        let log = ServedUrlLog::new();
        log.record("http://a.case1.test:28080/");
        log.record("http://a.case1.test:28080/robots.txt");

        assert_eq!(
            log.served_urls(),
            vec!["http://a.case1.test:28080/", "http://a.case1.test:28080/robots.txt"]
        );
        assert!(log.contains("http://a.case1.test:28080/"));

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn clones_share_entries() {
        let log = ServedUrlLog::new();
        let server_side = log.clone();
        server_side.record("http://x/");
        assert_eq!(log.len(), 1);
    }
}
