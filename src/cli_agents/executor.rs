use crate::errors::{ForceError, ForceResult};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one CLI subprocess run.
#[derive(Debug, Default)]
pub struct CliRunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// The overall wall-clock deadline fired.
    pub timed_out: bool,
    /// The process produced no output for the idle interval.
    pub idle_timed_out: bool,
}

/// Kill interval when the process stops producing output.
pub const IDLE_OUTPUT_TIMEOUT: Duration = Duration::from_secs(300);

/// Run a CLI agent subprocess with a scrubbed environment, an overall
/// deadline, and an idle-output timeout. On either timeout the process is
/// killed and the partial output returned with the corresponding flag set.
pub async fn run_cli(
    command: &[String],
    env: &HashMap<String, String>,
    cwd: &Path,
    timeout: Duration,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> ForceResult<CliRunResult> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ForceError::InvalidParameter {
            param: "command".into(),
            message: "empty command line".into(),
        })?;
    info!("Spawning CLI agent: {program} ({} args)", args.len());

    let mut child = Command::new(program)
        .args(args)
        .env_clear()
        .envs(env)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ForceError::BackendUnavailable(format!("failed to spawn {program}: {e}")))?;

    let stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr_pipe.read_to_string(&mut buf).await;
        buf
    });

    let started = Instant::now();
    let mut lines = BufReader::new(stdout_pipe).lines();
    let mut stdout = String::new();
    let mut result = CliRunResult::default();

    loop {
        let remaining = match timeout.checked_sub(started.elapsed()) {
            Some(r) => r,
            None => {
                warn!("CLI agent exceeded {}s deadline, killing", timeout.as_secs());
                result.timed_out = true;
                let _ = child.kill().await;
                break;
            }
        };
        let window = remaining.min(idle_timeout);

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ForceError::Cancelled);
            }
            line = tokio::time::timeout(window, lines.next_line()) => match line {
                Ok(Ok(Some(line))) => {
                    stdout.push_str(&line);
                    stdout.push('\n');
                }
                Ok(Ok(None)) => break, // stdout closed
                Ok(Err(e)) => {
                    warn!("Error reading CLI output: {e}");
                    break;
                }
                Err(_) => {
                    if started.elapsed() >= timeout {
                        warn!("CLI agent exceeded {}s deadline, killing", timeout.as_secs());
                        result.timed_out = true;
                    } else {
                        warn!(
                            "CLI agent idle for {}s, killing",
                            idle_timeout.as_secs()
                        );
                        result.idle_timed_out = true;
                    }
                    let _ = child.kill().await;
                    break;
                }
            }
        }
    }

    // The child may have closed stdout while still running; don't block past
    // the deadline waiting for it to exit.
    let status = match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            warn!("CLI agent closed stdout but kept running, killing");
            result.idle_timed_out = true;
            let _ = child.kill().await;
            child.wait().await.ok()
        }
    };
    result.exit_code = status.and_then(|s| s.code());
    result.stdout = stdout;
    result.stderr = stderr_task.await.unwrap_or_default();
    debug!(
        "CLI agent exited: code={:?}, {} stdout bytes",
        result.exit_code,
        result.stdout.len()
    );
    Ok(result)
}
