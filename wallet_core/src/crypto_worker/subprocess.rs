use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::envelope::{encode_request, ResponseEnvelope};
use super::{CryptoRequest, CryptoResponse, CryptoWorker, CryptoWorkerError};

struct Process {
    // Held so the child is killed when the worker goes away.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Runs requests in a child process that speaks the line-delimited JSON
/// envelope on stdin/stdout.
///
/// The child is started on first use and restarted after any I/O failure.
/// Requests are serialized: one in flight at a time.
pub struct SubprocessWorker {
    program: PathBuf,
    args: Vec<String>,
    state: Mutex<(u64, Option<Process>)>,
}

impl SubprocessWorker {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            state: Mutex::new((0, None)),
        }
    }

    fn spawn(&self) -> Result<Process, CryptoWorkerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CryptoWorkerError::Unavailable(format!(
                    "cannot start {}: {e}",
                    self.program.display()
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CryptoWorkerError::Unavailable("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CryptoWorkerError::Unavailable("child has no stdout".into()))?;
        info!(program = %self.program.display(), "started crypto worker process");
        Ok(Process {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

async fn round_trip(process: &mut Process, line: &str) -> Result<String, CryptoWorkerError> {
    let io = |e: std::io::Error| CryptoWorkerError::Unavailable(e.to_string());
    process.stdin.write_all(line.as_bytes()).await.map_err(io)?;
    process.stdin.write_all(b"\n").await.map_err(io)?;
    process.stdin.flush().await.map_err(io)?;
    process
        .stdout
        .next_line()
        .await
        .map_err(io)?
        .ok_or_else(|| CryptoWorkerError::Unavailable("crypto worker process exited".into()))
}

#[async_trait]
impl CryptoWorker for SubprocessWorker {
    async fn execute(&self, request: CryptoRequest) -> Result<CryptoResponse, CryptoWorkerError> {
        let operation = request.operation();
        let mut guard = self.state.lock().await;
        let (next_id, process) = &mut *guard;
        *next_id += 1;
        let id = *next_id;
        let line = encode_request(&request, id).map_err(|e| CryptoWorkerError::Operation {
            operation,
            reason: e.to_string(),
        })?;

        if process.is_none() {
            *process = Some(self.spawn()?);
        }
        let Some(proc_ref) = process.as_mut() else {
            return Err(CryptoWorkerError::Unavailable("no crypto worker process".into()));
        };
        let reply = match round_trip(proc_ref, &line).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, operation, "crypto worker process failed, will restart");
                *process = None;
                return Err(e);
            }
        };

        let envelope: ResponseEnvelope =
            serde_json::from_str(&reply).map_err(|e| CryptoWorkerError::Operation {
                operation,
                reason: format!("malformed worker response: {e}"),
            })?;
        if envelope.id() != id {
            warn!(expected = id, got = envelope.id(), "crypto worker answered out of order");
            *process = None;
            return Err(CryptoWorkerError::Unavailable(
                "crypto worker response id mismatch".into(),
            ));
        }
        debug!(id, operation, "crypto worker reply");
        match envelope {
            ResponseEnvelope::Success { result, .. } => Ok(result),
            ResponseEnvelope::Error { error, .. } => Err(CryptoWorkerError::Operation {
                operation,
                reason: error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let worker = SubprocessWorker::new(PathBuf::from("/nonexistent/taler-worker"), vec![]);
        let err = worker
            .execute(CryptoRequest::HashString { value: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoWorkerError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_that_exits_is_reported() {
        let worker = SubprocessWorker::new(PathBuf::from("true"), vec![]);
        let err = worker
            .execute(CryptoRequest::HashString { value: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoWorkerError::Unavailable(_)));
    }
}
