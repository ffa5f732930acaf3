//! Report sink.
//!
//! Collects one frozen [`TestSuite`] per test case and renders the
//! aggregate report.

use probe_types::{TestRecord, TestSuite};
use serde::Serialize;

/// Totals over every suite of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    /// Test cases run.
    pub suites: usize,
    /// Records across all suites.
    pub tests: usize,
    /// Failed records across all suites.
    pub failures: usize,
}

impl Summary {
    /// True when nothing failed.
    pub fn passed(&self) -> bool {
        self.failures == 0
    }
}

/// Aggregates the suites of one harness run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSink {
    suites: Vec<TestSuite>,
}

impl ReportSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze a test case's records and append them as a suite.
    pub fn add_suite(&mut self, name: &str, description: &str, records: Vec<TestRecord>) -> &TestSuite {
        self.suites.push(TestSuite::new(name, description, records));
        &self.suites[self.suites.len() - 1]
    }

    /// Suites collected so far.
    pub fn suites(&self) -> &[TestSuite] {
        &self.suites
    }

    /// Totals.
    pub fn summary(&self) -> Summary {
        self.suites.iter().fold(
            Summary {
                suites: self.suites.len(),
                ..Summary::default()
            },
            |acc, suite| Summary {
                tests: acc.tests + suite.tests,
                failures: acc.failures + suite.failures,
                ..acc
            },
        )
    }

    /// Pretty JSON: `{"suites": [...]}`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_totals_all_suites() {
        let mut sink = ReportSink::new();
        sink.add_suite(
            "case1",
            "basic crawl",
            vec![
                TestRecord::passed("case1", "pre - start", 1.0),
                TestRecord::failed("case1", "verify_indexed - x", 0.1, "no results"),
            ],
        );
        let suite = sink.add_suite("case2", "redirects", vec![TestRecord::passed("case2", "seed - ", 0.2)]);
        assert!(suite.passed());

        let summary = sink.summary();
        assert_eq!(
            summary,
            Summary {
                suites: 2,
                tests: 3,
                failures: 1
            }
        );
        assert!(!summary.passed());
    }

    #[test]
    fn empty_sink_passes() {
        assert!(ReportSink::new().summary().passed());
    }

    #[test]
    fn json_schema() {
        let mut sink = ReportSink::new();
        sink.add_suite("case1", "desc", vec![TestRecord::passed("case1", "pre - start", 0.5)]);

        let value: serde_json::Value = serde_json::from_str(&sink.to_json().unwrap()).unwrap();
        let suite = &value["suites"][0];
        assert_eq!(suite["name"], "case1");
        assert_eq!(suite["description"], "desc");
        assert_eq!(suite["tests"], 1);
        assert_eq!(suite["failures"], 0);
        assert_eq!(suite["records"][0]["name"], "pre - start");
    }
}
