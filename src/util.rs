use std::io::{BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandRunResult {
    /// True only when the process exited on its own with status 0.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// stdout followed by stderr, separated by a newline when both are present.
    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Run `command` to completion. With a `limit`, the process is killed once
/// it runs past it; without one, it is waited on for as long as it takes.
///
/// stdin is closed so tools like `patch` never block waiting for an answer.
pub fn run_command(
    command: &mut Command,
    limit: Option<Duration>,
) -> Result<CommandRunResult, String> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;
    let stdout_handle = thread::spawn(move || read_all(stdout));
    let stderr_handle = thread::spawn(move || read_all(stderr));

    let (status, timed_out) = match limit {
        Some(limit) => wait_until(&mut child, Instant::now() + limit)?,
        None => {
            let status = child
                .wait()
                .map_err(|e| format!("Failed to wait for command: {}", e))?;
            (Some(status), false)
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

/// Poll `child` until it exits or `deadline` passes. Returns the exit status
/// (if one could be collected) and whether the child had to be killed.
fn wait_until(child: &mut Child, deadline: Instant) -> Result<(Option<ExitStatus>, bool), String> {
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| format!("Failed to wait for command: {}", e))?
        {
            return Ok((Some(status), false));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            return Ok((child.wait().ok(), true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn read_all(source: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut reader = BufReader::new(source);
    let _ = reader.read_to_end(&mut buf);
    buf
}

/// Keep the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_chars_unicode_safe() {
        assert_eq!(tail_chars("错误: 失败 😊", 4), "失败 😊");
        assert_eq!(tail_chars("ok", 10), "ok");
        assert_eq!(tail_chars("anything", 0), "");
    }

    #[test]
    fn test_run_command_captures_both_streams() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let result = run_command(&mut cmd, Some(Duration::from_secs(10))).unwrap();
        assert!(!result.succeeded());
        assert!(!result.timed_out);
        assert_eq!(result.exit_code(), Some(3));
        assert_eq!(result.combined_output(), "out\nerr\n");
    }

    #[test]
    fn test_run_command_kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_command(&mut cmd, Some(Duration::from_millis(200))).unwrap();
        assert!(result.timed_out);
        assert!(!result.succeeded());
    }

    #[test]
    fn test_run_command_reports_spawn_failure() {
        let mut cmd = Command::new("definitely-not-a-real-binary-4c1d");
        let err = run_command(&mut cmd, None).unwrap_err();
        assert!(err.contains("Failed to start command"));
    }

    #[test]
    fn test_run_command_without_limit_waits_for_exit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 1; echo finished"]);
        let result = run_command(&mut cmd, None).unwrap();
        assert!(!result.timed_out);
        assert!(result.succeeded());
        assert_eq!(result.stdout, "finished\n");
    }
}
