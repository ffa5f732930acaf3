//! Test case discovery and loading.
//!
//! A test case is a directory under the test root. Its `testcase/`
//! subdirectory holds instruction scripts, `seeds` and expectation files;
//! every other subdirectory is a fixture origin served by the fixture server.

use std::io;
use std::path::{Path, PathBuf};

use probe_core::instruction::literal_lines;
use probe_core::natural_sort;

/// Name of the per-case configuration directory.
pub const CONFIG_DIR: &str = "testcase";

/// Prefix of instruction script file names.
pub const INSTRUCTIONS_PREFIX: &str = "instructions";

/// One loaded test case. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Directory name.
    pub name: String,
    /// The case directory.
    pub directory: PathBuf,
    /// First README line with `.` removed, or the name.
    pub description: String,
    /// Instruction scripts in natural order.
    pub instruction_files: Vec<PathBuf>,
}

impl TestCase {
    /// Load the case `name` under `test_dir`.
    pub async fn load(test_dir: &Path, name: &str) -> io::Result<Self> {
        let directory = test_dir.join(name);

        let description = match tokio::fs::read_to_string(directory.join("README")).await {
            Ok(text) => text.lines().next().unwrap_or_default().replace('.', ""),
            Err(e) if e.kind() == io::ErrorKind::NotFound => name.to_string(),
            Err(e) => return Err(e),
        };

        let config_dir = directory.join(CONFIG_DIR);
        let mut names = Vec::new();
        if tokio::fs::metadata(&config_dir).await.is_ok_and(|m| m.is_dir()) {
            let mut entries = tokio::fs::read_dir(&config_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if file_name.starts_with(INSTRUCTIONS_PREFIX) && entry.file_type().await?.is_file() {
                    names.push(file_name);
                }
            }
        }
        natural_sort(&mut names);

        Ok(Self {
            name: name.to_string(),
            instruction_files: names.iter().map(|n| config_dir.join(n)).collect(),
            directory,
            description,
        })
    }

    /// The `testcase/` directory.
    pub fn config_dir(&self) -> PathBuf {
        self.directory.join(CONFIG_DIR)
    }

    /// Whether the case has a `testcase/` directory; cases without one are not run.
    pub async fn is_runnable(&self) -> bool {
        tokio::fs::metadata(self.config_dir()).await.is_ok_and(|m| m.is_dir())
    }

    /// Literal lines of `testcase/<name>`, empty when the file is absent.
    pub async fn expectations(&self, name: &str) -> io::Result<Vec<String>> {
        match tokio::fs::read_to_string(self.config_dir().join(name)).await {
            Ok(text) => Ok(literal_lines(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Fixture origins: every subdirectory except `testcase/`, in natural order.
    pub async fn origins(&self) -> io::Result<Vec<String>> {
        let mut origins = subdirectories(&self.directory).await?;
        origins.retain(|name| name != CONFIG_DIR);
        Ok(origins)
    }
}

/// Test case names under `test_dir`, in natural order.
pub async fn discover(test_dir: &Path) -> io::Result<Vec<String>> {
    subdirectories(test_dir).await
}

async fn subdirectories(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    natural_sort(&mut names);
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let case = dir.path().join("case2");
        fs::create_dir_all(case.join("testcase")).unwrap();
        fs::create_dir_all(case.join("a")).unwrap();
        fs::create_dir_all(case.join("b")).unwrap();
        fs::create_dir_all(dir.path().join("case10")).unwrap();
        fs::create_dir_all(dir.path().join("case1")).unwrap();
        fs::write(case.join("README"), "Robots.txt handling.\nmore\n").unwrap();
        fs::write(case.join("testcase/instructions10"), "").unwrap();
        fs::write(case.join("testcase/instructions2"), "").unwrap();
        fs::write(case.join("testcase/instructions"), "").unwrap();
        fs::write(case.join("testcase/verify_indexed"), "# comment\nrobots\n\n  disallowed  \n").unwrap();
        dir
    }

    #[tokio::test]
    async fn discovers_cases_in_natural_order() {
        let dir = tree();
        assert_eq!(discover(dir.path()).await.unwrap(), vec!["case1", "case2", "case10"]);
    }

    #[tokio::test]
    async fn loads_description_and_instruction_files() {
        let dir = tree();
        let case = TestCase::load(dir.path(), "case2").await.unwrap();

        assert_eq!(case.description, "Robotstxt handling");
        let files: Vec<_> = case
            .instruction_files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["instructions", "instructions2", "instructions10"]);
        assert!(case.is_runnable().await);
        assert_eq!(case.origins().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn case_without_readme_or_config() {
        let dir = tree();
        let case = TestCase::load(dir.path(), "case1").await.unwrap();
        assert_eq!(case.description, "case1");
        assert!(case.instruction_files.is_empty());
        assert!(!case.is_runnable().await);
    }

    #[tokio::test]
    async fn expectation_files() {
        let dir = tree();
        let case = TestCase::load(dir.path(), "case2").await.unwrap();
        assert_eq!(case.expectations("verify_indexed").await.unwrap(), vec!["robots", "disallowed"]);
        assert!(case.expectations("verify_not_indexed").await.unwrap().is_empty());
    }
}
