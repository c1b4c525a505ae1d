//! Stage executor — runs a stage's external command and observes the result.
//!
//! Execution is synchronous: the orchestrator blocks until the command exits.
//! Both output streams are drained line by line while the child runs; only
//! the last `tail_lines` of each are held in memory.
//! The [`StageRunner`] trait is the seam between the orchestrator and the
//! outside world; [`ProcessRunner`] is the real implementation.

use crate::config::RunContext;
use serde::Serialize;
use smartrun_core::Stage;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of one external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch `{program}` for stage '{stage}': {source}")]
    Launch {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting on `{program}` for stage '{stage}': {source}")]
    Wait {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs the command bound to a stage.
pub trait StageRunner {
    fn run(&self, stage: &Stage, ctx: &RunContext) -> Result<ExecutionResult, ExecError>;
}

impl<R: StageRunner + ?Sized> StageRunner for &R {
    fn run(&self, stage: &Stage, ctx: &RunContext) -> Result<ExecutionResult, ExecError> {
        (**self).run(stage, ctx)
    }
}

/// Spawns the stage command as a child process in the run's working
/// directory, inheriting the environment unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl StageRunner for ProcessRunner {
    fn run(&self, stage: &Stage, ctx: &RunContext) -> Result<ExecutionResult, ExecError> {
        tracing::debug!(stage = stage.name(), command = %stage.command, "spawning");

        let start = Instant::now();
        let mut child = Command::new(&stage.command.program)
            .args(&stage.command.args)
            .current_dir(&ctx.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Launch {
                stage: stage.name().to_string(),
                program: stage.command.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let keep = ctx.tail_lines;
        let name = stage.name();

        // Both pipes must be drained concurrently or a chatty child blocks.
        let (status, stdout_tail, stderr_tail) = std::thread::scope(|scope| {
            let out = scope.spawn(move || drain(stdout, keep, name, "stdout"));
            let err = scope.spawn(move || drain(stderr, keep, name, "stderr"));
            let status = child.wait();
            (
                status,
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            )
        });
        let status = status.map_err(|source| ExecError::Wait {
            stage: name.to_string(),
            program: stage.command.program.clone(),
            source,
        })?;

        Ok(ExecutionResult {
            exit_code: status.code(),
            duration: start.elapsed(),
            stdout_tail,
            stderr_tail,
        })
    }
}

/// Read `stream` to the end, keeping its last `keep` non-empty lines.
fn drain<R: Read>(stream: Option<R>, keep: usize, stage: &str, channel: &str) -> Vec<String> {
    let mut tail = TailBuffer::new(keep);
    let Some(stream) = stream else {
        return Vec::new();
    };
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                tracing::debug!(stage, stream = channel, "{line}");
                tail.push(line);
            }
            Err(e) => {
                tracing::warn!(stage, stream = channel, error = %e, "output capture stopped");
                break;
            }
        }
    }
    tail.into_lines()
}

/// Bounded ring of the most recent non-empty lines.
#[derive(Debug, Clone, Default)]
struct TailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TailBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    fn push(&mut self, line: &str) {
        if self.capacity == 0 || line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail(out: &[u8], keep: usize) -> Vec<String> {
        drain(Some(out), keep, "test", "stdout")
    }

    #[test]
    fn tail_keeps_last_lines() {
        let out = b"one\ntwo\n\nthree\nfour\n";
        assert_eq!(tail(out, 2), vec!["three", "four"]);
        assert_eq!(tail(out, 10), vec!["one", "two", "three", "four"]);
        assert!(tail(out, 0).is_empty());
        assert!(tail(b"", 5).is_empty());
    }

    #[test]
    fn tail_buffer_never_exceeds_capacity() {
        let mut buffer = TailBuffer::new(3);
        for i in 0..10_000 {
            buffer.push(&i.to_string());
            assert!(buffer.lines.len() <= 3);
        }
        assert_eq!(buffer.into_lines(), vec!["9997", "9998", "9999"]);
    }

    #[test]
    fn drain_handles_crlf_and_missing_final_newline() {
        assert_eq!(tail(b"a\r\nb\r\nlast", 5), vec!["a", "b", "last"]);
    }

    #[test]
    fn result_success_requires_zero_exit() {
        let mut result = ExecutionResult {
            exit_code: Some(0),
            duration: Duration::from_millis(1500),
            stdout_tail: vec![],
            stderr_tail: vec![],
        };
        assert!(result.succeeded());
        assert_eq!(result.duration_ms(), 1500);

        result.exit_code = Some(3);
        assert!(!result.succeeded());
        result.exit_code = None;
        assert!(!result.succeeded());
    }

    #[test]
    fn serializes_duration_as_millis() {
        let result = ExecutionResult {
            exit_code: Some(0),
            duration: Duration::from_millis(42),
            stdout_tail: vec!["done".into()],
            stderr_tail: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["exit_code"], 0);
    }
}
