//! Child process supervision
//!
//! The child is started in its own process group with both pipes captured.
//! Two reader tasks drain stdout and stderr concurrently into one channel, so
//! neither pipe can fill up and stall the child, and the collected text keeps
//! the order lines arrived in. On timeout or cancellation the whole group is
//! killed, which also takes down anything the shell spawned.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RunExit, RuntimeError};

/// Collected output is capped; the oldest half is dropped when exceeded.
pub const MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

/// Readers get this long to drain after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit: RunExit,
    pub output: String,
}

/// Runs `command` to completion, to its deadline, or until `cancel` fires.
///
/// Returns [`RuntimeError::Cancelled`] on cancellation; a timeout is a normal
/// outcome with [`RunExit::TimedOut`].
pub async fn run_command(
    mut command: Command,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, RuntimeError> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    debug!(program = %program, pid, "Spawned build process");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
    }
    drop(tx);

    let collector = tokio::spawn(async move {
        let mut output = String::new();
        while let Some(line) = rx.recv().await {
            output.push_str(&line);
            if output.len() > MAX_OUTPUT_BYTES {
                let mut cut = output.len() / 2;
                while !output.is_char_boundary(cut) {
                    cut += 1;
                }
                output.drain(..cut);
            }
        }
        output
    });

    enum Ended {
        Exited(std::process::ExitStatus),
        TimedOut,
        Cancelled,
    }

    let ended = tokio::select! {
        status = child.wait() => Ended::Exited(status?),
        _ = tokio::time::sleep(timeout) => Ended::TimedOut,
        _ = cancel.cancelled() => Ended::Cancelled,
    };

    if !matches!(ended, Ended::Exited(_)) {
        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Child already gone after group kill");
        }
    }

    for reader in readers {
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            warn!("Output reader did not finish after the process ended");
        }
    }
    let output = collector.await.unwrap_or_default();

    let exit = match ended {
        Ended::Exited(status) => match status.code() {
            Some(code) => RunExit::Code(code),
            None => RunExit::Signaled,
        },
        Ended::TimedOut => {
            warn!(program = %program, seconds = timeout.as_secs(), "Build process timed out, killed");
            RunExit::TimedOut {
                seconds: timeout.as_secs(),
            }
        }
        Ended::Cancelled => return Err(RuntimeError::Cancelled),
    };

    Ok(ProcessOutcome { exit, output })
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading process output");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: killpg only sends a signal; the group id is the pid of a child
    // we spawned as group leader.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let outcome = run_command(
            sh("echo out; echo err 1>&2; exit 3"),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit, RunExit::Code(3));
        assert!(outcome.output.contains("out\n"));
        assert!(outcome.output.contains("err\n"));
    }

    #[tokio::test]
    async fn test_large_output_on_both_pipes_does_not_stall() {
        let outcome = run_command(
            sh("i=0; while [ $i -lt 20000 ]; do echo line$i; echo err$i 1>&2; i=$((i+1)); done"),
            Duration::from_secs(30),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit, RunExit::Code(0));
        assert!(outcome.output.contains("line19999"));
        assert!(outcome.output.contains("err19999"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("(sleep 2; touch {}) & sleep 30", marker.display());

        let start = Instant::now();
        let outcome = run_command(sh(&script), Duration::from_millis(300), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.exit, RunExit::TimedOut { seconds: 0 });
        assert!(start.elapsed() < Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background child outlived the group kill");
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = run_command(sh("sleep 30"), Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(RuntimeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = run_command(
            Command::new("/definitely/not/a/binary"),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(RuntimeError::Spawn { .. })));
    }
}
