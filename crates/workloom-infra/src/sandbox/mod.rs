//! Isolated subprocess execution for python_script steps.
//!
//! Protocol: the script body and the full variable mapping are persisted to
//! two fresh temp files, then the interpreter is spawned as
//! `python3 <script> --variables-file <vars.json>`. The file form defeats
//! platform command-line length limits; scripts may also accept an inline
//! `--variables '<json>'`. Stdout is trimmed and parsed as the result JSON
//! (non-JSON falls back to `{"result": <raw>}`); stderr is captured as logs;
//! a non-zero exit code fails the step with the stderr tail as the error.
//!
//! Subprocess I/O is UTF-8 in both directions with replacement on
//! undecodable bytes; `PYTHONIOENCODING`/`PYTHONUTF8` override platforms
//! whose default codec is not UTF-8. The sandbox isolates the parent from
//! crashes and runaway scripts, not from malicious code.

use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};

use workloom_core::workflow::dispatcher::ScriptOutcome;

/// Default hard timeout for one script run.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 300;

/// How much of the stderr tail becomes the error message.
const STDERR_TAIL_CHARS: usize = 500;

/// Sandboxed script executor.
pub struct ScriptSandbox {
    interpreter: String,
    timeout: Duration,
}

impl ScriptSandbox {
    /// Interpreter from `WORKLOOM_PYTHON` (default `python3`), 300s timeout.
    pub fn new() -> Self {
        let interpreter =
            std::env::var("WORKLOOM_PYTHON").unwrap_or_else(|_| "python3".to_string());
        Self {
            interpreter,
            timeout: Duration::from_secs(DEFAULT_SCRIPT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute a script body with the given variable view.
    ///
    /// Never fails across the boundary: spawn errors, timeouts, and non-zero
    /// exits all come back inside the outcome.
    pub async fn run(
        &self,
        code: &str,
        variables: &HashMap<String, Value>,
    ) -> ScriptOutcome {
        // Both temp files delete themselves on drop, which is the always-run
        // cleanup path regardless of how execution ends.
        let script_file = match write_temp(".py", code.as_bytes()) {
            Ok(f) => f,
            Err(e) => return failure(format!("failed to write script file: {e}"), String::new()),
        };

        let variables_json = match serde_json::to_string(variables) {
            Ok(s) => s,
            Err(e) => return failure(format!("failed to serialize variables: {e}"), String::new()),
        };
        let variables_file = match write_temp(".json", variables_json.as_bytes()) {
            Ok(f) => f,
            Err(e) => {
                return failure(format!("failed to write variables file: {e}"), String::new())
            }
        };

        let child = tokio::process::Command::new(&self.interpreter)
            .arg(script_file.path())
            .arg("--variables-file")
            .arg(variables_file.path())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUTF8", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return failure(
                    format!("failed to spawn {}: {e}", self.interpreter),
                    String::new(),
                )
            }
        };

        // Dropping the wait future on expiry kills the child (kill_on_drop).
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return failure(format!("failed to wait for script: {e}"), String::new()),
            Err(_) => {
                return failure(
                    format!("script timed out after {}s", self.timeout.as_secs()),
                    String::new(),
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return failure(
                format!("script exited with code {code}: {}", tail.trim()),
                stderr,
            );
        }

        let trimmed = stdout.trim();
        let parsed = serde_json::from_str::<Value>(trimmed)
            .unwrap_or_else(|_| json!({ "result": trimmed }));

        ScriptOutcome {
            success: true,
            output: parsed,
            logs: stderr,
            error: None,
        }
    }
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::new()
    }
}

fn write_temp(suffix: &str, content: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

fn failure(error: String, logs: String) -> ScriptOutcome {
    ScriptOutcome {
        success: false,
        output: Value::Null,
        logs,
        error: Some(error),
    }
}

// ---------------------------------------------------------------------------
// Tests (spawn a real python3)
// ---------------------------------------------------------------------------
