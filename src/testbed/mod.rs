//! Git-backed testbed session
//!
//! Works on a testbed that has already been provisioned: a git checkout of
//! the task's repository at its base commit. Patches go through `git apply`
//! first and fall back to a fuzzy `patch` run. Every step leaves a trace in
//! the instance's eval log.

pub mod eval_log;

use crate::instance::TaskInstance;
use crate::patch_type::PatchType;
use crate::session::{EnvSession, SessionConfig};
use crate::util::{run_command, tail_chars, CommandRunResult};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use eval_log::{
    log_file_name, EvalLog, APPLY_PATCH_FAIL, APPLY_PATCH_PASS, TESTS_ERROR, TESTS_FAILED,
    TESTS_PASSED, TESTS_TIMEOUT,
};
use fs2::FileExt;
use git2::Repository;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const PATCH_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const PATCH_FUZZ: &str = "--fuzz=5";
const ERROR_OUTPUT_MAX_CHARS: usize = 8_000;

/// An exclusively held, prepared testbed for one task instance.
#[derive(Debug)]
pub struct GitTestbed {
    config: SessionConfig,
    testbed: PathBuf,
    scratch_dir: PathBuf,
    log: EvalLog,
    lock: Option<File>,
    closed: bool,
}

impl GitTestbed {
    /// Take the testbed for `config.instance_id`.
    ///
    /// Fails if the testbed directory is missing or another evaluation
    /// already holds it.
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let testbed = config.testbed.canonicalize().with_context(|| {
            format!("Failed to resolve testbed '{}'", config.testbed.display())
        })?;
        if !testbed.is_dir() {
            return Err(anyhow!("Testbed '{}' is not a directory", testbed.display()));
        }
        let scratch_dir = testbed
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| testbed.clone());

        let lock = acquire_lock(&scratch_dir, &config.testbed_name)?;

        let log_path = config.log_dir.join(log_file_name(
            &config.instance_id,
            &config.testbed_name,
            config.log_suffix.as_deref(),
        ));
        let mut log = EvalLog::open(&log_path)?;
        log.append(&format!(
            "[{}] Evaluating {} in testbed {} ({})",
            Utc::now().to_rfc3339(),
            config.instance_id,
            config.testbed_name,
            testbed.display()
        ));

        info!(
            "[{}] [{}] Opened testbed, logging to {}",
            config.testbed_name,
            config.instance_id,
            log_path.display()
        );

        Ok(Self {
            config: config.clone(),
            testbed,
            scratch_dir,
            log,
            lock: Some(lock),
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.testbed
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn env_overrides() -> Vec<(String, String)> {
        vec![
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GIT_ASKPASS".to_string(), "/bin/true".to_string()),
        ]
    }

    fn temp_patch_path(&self, patch_type: PatchType) -> PathBuf {
        self.scratch_dir.join(format!(
            "temp_{}_{}.patch",
            sanitize_component(&self.config.instance_id),
            patch_type
        ))
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(&self.testbed).args(args);
        for (k, v) in Self::env_overrides() {
            cmd.env(k, v);
        }
        cmd
    }

    fn run(
        &self,
        program: &str,
        args: &[&str],
        limit: Option<Duration>,
    ) -> Result<CommandRunResult> {
        let mut cmd = self.command(program, args);
        run_command(&mut cmd, limit)
            .map_err(|e| anyhow!("Failed to run {} {}: {}", program, args.join(" "), e))
    }

    /// `git apply`, then `patch` with fuzz if git refuses.
    fn apply_file(
        &self,
        patch_path: &Path,
        patch_type: PatchType,
        revert: bool,
    ) -> Result<CommandRunResult> {
        let patch_arg = patch_path.to_string_lossy().to_string();

        let mut git_args = vec!["apply", "-v"];
        if revert {
            git_args.push("-R");
        }
        git_args.push(patch_arg.as_str());
        let git_out = self.run("git", &git_args, Some(PATCH_COMMAND_TIMEOUT))?;
        if git_out.succeeded() {
            return Ok(git_out);
        }
        debug!(
            "[{}] [{}] git apply refused {} patch, trying patch(1)",
            self.config.testbed_name, self.config.instance_id, patch_type
        );

        // `patch` may half-apply; reset first so it starts clean. The test
        // patch is exempt because the prediction is already in the tree.
        if !patch_type.is_test() {
            match self.run("git", &["restore", "."], Some(PATCH_COMMAND_TIMEOUT)) {
                Ok(out) if out.succeeded() => {}
                Ok(out) => warn!("git restore failed: {}", out.stderr.trim()),
                Err(err) => warn!("{:#}", err),
            }
        }

        let mut patch_args = vec!["--batch", PATCH_FUZZ, "-p1"];
        if revert {
            patch_args.push("-R");
        }
        patch_args.push("-i");
        patch_args.push(patch_arg.as_str());
        self.run("patch", &patch_args, Some(PATCH_COMMAND_TIMEOUT))
    }

    /// Put the task's test files back to HEAD so the test patch lands on
    /// pristine files.
    fn restore_test_directives(&self, directives: &[String]) {
        if directives.is_empty() {
            return;
        }
        let repo = match Repository::discover(&self.testbed) {
            Ok(repo) => repo,
            Err(err) => {
                warn!("Cannot restore test files, testbed is not a repository: {}", err);
                return;
            }
        };
        for directive in directives {
            if let Err(err) = restore_from_head(&repo, &self.testbed, Path::new(directive)) {
                debug!("Skipping test directive '{}': {:#}", directive, err);
            }
        }
    }
}

impl EnvSession for GitTestbed {
    fn apply(&mut self, patch: Option<&str>, patch_type: PatchType, revert: bool) -> bool {
        let action = if revert { "Revert" } else { "Apply" };
        let tag = format!("[{}] [{}]", self.config.testbed_name, self.config.instance_id);

        let Some(patch) = patch else {
            error!("{} Patch is `None` ({})", tag, patch_type);
            self.log
                .append(&format!("{}; Prediction patch is `None`", APPLY_PATCH_FAIL));
            return false;
        };
        if patch.trim().is_empty() {
            error!("{} Patch is empty ({})", tag, patch_type);
            self.log
                .append(&format!("{}; Patch is empty ({})", APPLY_PATCH_FAIL, patch_type));
            return false;
        }

        let patch_path = self.temp_patch_path(patch_type);
        if let Err(err) = fs::write(&patch_path, patch) {
            error!("{} Failed to write {}: {}", tag, patch_path.display(), err);
            self.log.append(&format!(
                "{}; ({})\nOutput:\nFailed to write patch file: {}",
                APPLY_PATCH_FAIL, patch_type, err
            ));
            return false;
        }

        if patch_type.is_test() && !revert {
            self.restore_test_directives(&self.config.test_directives);
        }

        let result = self.apply_file(&patch_path, patch_type, revert);
        let _ = fs::remove_file(&patch_path);

        match result {
            Ok(out) if out.succeeded() => {
                info!("{} {} patch successful ({})", tag, action, patch_type);
                self.log
                    .append(&format!("{} ({})", APPLY_PATCH_PASS, patch_type));
                true
            }
            Ok(out) => {
                error!("{} {} patch failed ({})", tag, action, patch_type);
                self.log.append(&format!(
                    "{}; ({})\nOutput:\n{}",
                    APPLY_PATCH_FAIL,
                    patch_type,
                    tail_chars(&out.combined_output(), ERROR_OUTPUT_MAX_CHARS)
                ));
                false
            }
            Err(err) => {
                error!("{} {} patch failed ({}): {:#}", tag, action, patch_type, err);
                self.log.append(&format!(
                    "{}; ({})\nOutput:\n{:#}",
                    APPLY_PATCH_FAIL, patch_type, err
                ));
                false
            }
        }
    }

    fn run_tests(&mut self, instance: &TaskInstance) -> bool {
        let tag = format!("[{}] [{}]", self.config.testbed_name, self.config.instance_id);
        let Some(test_cmd) = instance
            .test_cmd
            .as_deref()
            .filter(|cmd| !cmd.trim().is_empty())
        else {
            error!("{} No test command for instance", tag);
            self.log.append(&format!("{}: no test command", TESTS_ERROR));
            return false;
        };

        self.log.append(&format!("Test Script: {};", test_cmd));
        // No TIMEOUT means the suite runs unbounded.
        let limit = self.config.timeout;
        let start = Instant::now();
        let result = self.run("sh", &["-c", test_cmd], limit);
        let elapsed = start.elapsed();

        match result {
            Err(err) => {
                error!("{} Test run errored: {:#}", tag, err);
                self.log.append(&format!("{}: {:#}", TESTS_ERROR, err));
                false
            }
            Ok(out) => {
                self.log.append(&out.combined_output());
                if out.timed_out {
                    let secs = limit.map(|l| l.as_secs()).unwrap_or_default();
                    warn!("{} Tests timed out after {}s", tag, secs);
                    self.log
                        .append(&format!("{} after {} seconds", TESTS_TIMEOUT, secs));
                    false
                } else if out.succeeded() {
                    info!("{} Tests passed in {}ms", tag, elapsed.as_millis());
                    self.log.append(&format!("\n{}", TESTS_PASSED));
                    true
                } else {
                    warn!(
                        "{} Tests failed with exit code {:?} in {}ms",
                        tag,
                        out.exit_code(),
                        elapsed.as_millis()
                    );
                    self.log.append(&format!("\n{}", TESTS_FAILED));
                    false
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for patch_type in PatchType::ALL {
            let path = self.temp_patch_path(patch_type);
            if path.exists() {
                let _ = fs::remove_file(&path);
            }
        }
        self.log.append(&format!(
            "[{}] Released testbed {}",
            Utc::now().to_rfc3339(),
            self.config.testbed_name
        ));

        if let Some(lock) = self.lock.take() {
            FileExt::unlock(&lock).context("Failed to release testbed lock")?;
        }
        debug!(
            "[{}] [{}] Closed testbed",
            self.config.testbed_name, self.config.instance_id
        );
        Ok(())
    }
}

impl Drop for GitTestbed {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Failed to close testbed: {:#}", err);
        }
    }
}

fn acquire_lock(dir: &Path, testbed_name: &str) -> Result<File> {
    let lock_path = dir.join(format!(".{}.lock", sanitize_component(testbed_name)));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open testbed lock '{}'", lock_path.display()))?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Err(anyhow!(
            "Testbed '{}' is already in use by another evaluation",
            testbed_name
        )),
        Err(err) => Err(err)
            .with_context(|| format!("Failed to lock testbed '{}'", lock_path.display())),
    }
}

/// Overwrite `relative` in the working tree with its HEAD content.
///
/// Paths that are absent from the working tree or from HEAD are left alone.
fn restore_from_head(repo: &Repository, root: &Path, relative: &Path) -> Result<()> {
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(anyhow!("path escapes the testbed"));
    }
    let absolute = root.join(relative);
    if !absolute.is_file() {
        return Err(anyhow!("not a file in the working tree"));
    }

    let tree = repo
        .head()
        .and_then(|head| head.peel_to_tree())
        .context("Failed to read HEAD tree")?;
    let entry = tree
        .get_path(relative)
        .context("file does not exist at HEAD")?;
    let blob = repo.find_blob(entry.id())?;
    fs::write(&absolute, blob.content())
        .with_context(|| format!("Failed to restore {}", relative.display()))?;
    Ok(())
}

fn sanitize_component(input: &str) -> String {
    let cleaned = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect::<String>();
    if cleaned.is_empty() {
        "instance".to_string()
    } else {
        cleaned
    }
}
