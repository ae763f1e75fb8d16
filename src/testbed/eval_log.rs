//! Per-instance evaluation log
//!
//! Plain-text, append-only. Graders grep for the `>>>>>` markers, so their
//! spelling is part of the output format.

use super::sanitize_component;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const APPLY_PATCH_FAIL: &str = ">>>>> Patch Apply Failed";
pub const APPLY_PATCH_PASS: &str = ">>>>> Applied Patch";
pub const TESTS_ERROR: &str = ">>>>> Tests Errored";
pub const TESTS_FAILED: &str = ">>>>> Some Tests Failed";
pub const TESTS_PASSED: &str = ">>>>> All Tests Passed";
pub const TESTS_TIMEOUT: &str = ">>>>> Tests Timed Out";

const LOG_FILE_EXT: &str = "eval.log";

/// `<instance_id>.<testbed_name>[.<suffix>].eval.log`, each part reduced to
/// file-name-safe characters so the log always lands directly in the log dir.
pub fn log_file_name(instance_id: &str, testbed_name: &str, suffix: Option<&str>) -> String {
    let instance_id = sanitize_component(instance_id);
    let testbed_name = sanitize_component(testbed_name);
    match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) => format!(
            "{}.{}.{}.{}",
            instance_id,
            testbed_name,
            sanitize_component(suffix),
            LOG_FILE_EXT
        ),
        None => format!("{}.{}.{}", instance_id, testbed_name, LOG_FILE_EXT),
    }
}

#[derive(Debug)]
pub struct EvalLog {
    path: PathBuf,
    file: File,
}

impl EvalLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create log directory '{}'", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open eval log '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `text`, adding a trailing newline if it lacks one.
    ///
    /// A write error is reported through tracing but never aborts the
    /// evaluation: the log is a by-product, not the result.
    pub fn append(&mut self, text: &str) {
        let mut chunk = text.to_string();
        if !chunk.ends_with('\n') {
            chunk.push('\n');
        }
        if let Err(err) = self.file.write_all(chunk.as_bytes()) {
            warn!("Failed to write eval log '{}': {}", self.path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_file_name_with_and_without_suffix() {
        assert_eq!(
            log_file_name("django__django-11099", "django__3.0", None),
            "django__django-11099.django__3.0.eval.log"
        );
        assert_eq!(
            log_file_name("django__django-11099", "django__3.0", Some("retry")),
            "django__django-11099.django__3.0.retry.eval.log"
        );
        assert_eq!(
            log_file_name("a", "b", Some("")),
            "a.b.eval.log"
        );
    }

    #[test]
    fn test_log_file_name_cannot_leave_log_dir() {
        let name = log_file_name("../../etc/owned", "bed/../x", Some("a/b"));
        assert!(!name.contains('/'));
        assert_eq!(name, "....etcowned.bed..x.ab.eval.log");

        let dir = tempdir().unwrap();
        let path = dir.path().join(&name);
        assert_eq!(path.parent(), Some(dir.path()));
    }

    #[test]
    fn test_append_creates_directories_and_accumulates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("x.eval.log");

        let mut log = EvalLog::open(&path).unwrap();
        log.append(APPLY_PATCH_PASS);
        log.append("output\n");
        drop(log);

        let mut reopened = EvalLog::open(&path).unwrap();
        reopened.append(TESTS_PASSED);
        drop(reopened);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            format!("{}\noutput\n{}\n", APPLY_PATCH_PASS, TESTS_PASSED)
        );
    }
}
