//! Test records collected for the report.

use serde::Serialize;

/// Outcome of one executed step. Appended only, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    /// Suite (test case) the step belongs to.
    pub suite: String,
    /// Step name, `<type> - <literal>`.
    pub name: String,
    /// Wall-clock time spent in the step.
    pub elapsed_seconds: f64,
    /// Whether the step failed.
    pub failed: bool,
    /// Why it failed, tagged with the literal that produced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Liveness notes, e.g. an unplanned cluster restart observed after the step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    /// Step was not executed because an earlier step of the case timed out.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl TestRecord {
    /// A passing record.
    pub fn passed(suite: &str, name: &str, elapsed_seconds: f64) -> Self {
        Self {
            suite: suite.into(),
            name: name.into(),
            elapsed_seconds,
            failed: false,
            failure_reason: None,
            annotations: Vec::new(),
            skipped: false,
        }
    }

    /// A failing record.
    pub fn failed(suite: &str, name: &str, elapsed_seconds: f64, reason: &str) -> Self {
        Self {
            failed: true,
            failure_reason: Some(reason.into()),
            ..Self::passed(suite, name, elapsed_seconds)
        }
    }

    /// A record for a step that never ran.
    pub fn skipped(suite: &str, name: &str) -> Self {
        Self {
            skipped: true,
            ..Self::passed(suite, name, 0.0)
        }
    }

    /// Attach a liveness annotation before the record is appended.
    pub fn with_annotation(mut self, note: impl Into<String>) -> Self {
        self.annotations.push(note.into());
        self
    }

    /// Attach an annotation that also fails the record.
    ///
    /// A record that already failed keeps its original reason.
    pub fn with_failure_annotation(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.failed = true;
        self.failure_reason.get_or_insert_with(|| note.clone());
        self.annotations.push(note);
        self
    }
}

/// All records of one test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSuite {
    /// Test case name.
    pub name: String,
    /// Human description from the case README.
    pub description: String,
    /// Number of records.
    pub tests: usize,
    /// Number of failed records.
    pub failures: usize,
    /// The records, in execution order.
    pub records: Vec<TestRecord>,
}

impl TestSuite {
    /// Freeze a test case's records into a suite.
    pub fn new(name: &str, description: &str, records: Vec<TestRecord>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tests: records.len(),
            failures: records.iter().filter(|r| r.failed).count(),
            records,
        }
    }

    /// True when no record failed.
    pub fn passed(&self) -> bool {
        self.failures == 0
    }
}
