//! Draining of the worker's output channels.
//!
//! stdout is kept byte-for-byte since it is parsed later. stderr is read line by
//! line and lines containing a known runtime noise marker are dropped. Both
//! drains and the exit wait are joined; the job is only complete when the
//! process has exited and both channels reached end of stream.

use crate::config::Config;
use crate::worker::{OutputStream, WorkerHandle, WorkerProcess};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct NoiseFilter {
    markers: Arc<[String]>,
}

impl NoiseFilter {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::<String>::into).collect(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.worker.noise_markers.iter().cloned())
    }

    pub fn is_noise(&self, line: &str) -> bool {
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }

    /// Whether a diagnostic line is worth keeping.
    pub fn retain(&self, line: &str) -> bool {
        !line.trim().is_empty() && !self.is_noise(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Terminated without an exit code (signal).
    Signaled,
    /// Exit status could not be observed.
    Unknown,
    TimedOut,
    /// Entry point missing; nothing was spawned.
    Unavailable,
    SpawnFailed,
}

impl Termination {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Termination::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub primary: Vec<u8>,
    pub diagnostic: String,
    pub termination: Termination,
}

impl RawOutcome {
    /// Outcome of a job whose worker never produced any stream.
    pub fn absent(termination: Termination) -> Self {
        Self {
            primary: Vec::new(),
            diagnostic: String::new(),
            termination,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamCollector {
    filter: NoiseFilter,
    timeout: Duration,
    kill_grace: Duration,
}

enum Interrupt {
    Finished {
        status: std::io::Result<Option<i32>>,
        drained: bool,
    },
    Cancelled,
    TimedOut,
}

impl StreamCollector {
    pub fn new(filter: NoiseFilter, timeout: Duration, kill_grace: Duration) -> Self {
        Self {
            filter,
            timeout,
            kill_grace,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            NoiseFilter::from_config(cfg),
            Duration::from_secs(cfg.worker.timeout_seconds),
            Duration::from_millis(cfg.worker.kill_grace_millis),
        )
    }

    /// Drains both channels until the worker exits. Returns `None` if `cancel`
    /// fired first; the worker is killed in that case and on timeout.
    ///
    /// Streams still open `kill_grace` after the worker exited belong to
    /// leftover descendants; those are killed and the output read so far is kept.
    pub async fn collect(
        &self,
        handle: WorkerHandle,
        cancel: &CancellationToken,
    ) -> Option<RawOutcome> {
        let WorkerHandle {
            primary,
            diagnostic,
            mut process,
        } = handle;

        let mut primary_buf = Vec::new();
        let mut diagnostic_buf = String::new();
        let exited = CancellationToken::new();

        let interrupt = {
            let wait = async {
                let status = process.wait().await;
                exited.cancel();
                status
            };
            let drains = async {
                let both = async {
                    tokio::join!(
                        drain_primary(primary, &mut primary_buf),
                        drain_diagnostic(diagnostic, &self.filter, &mut diagnostic_buf)
                    )
                };
                let lingering = async {
                    exited.cancelled().await;
                    tokio::time::sleep(self.kill_grace).await;
                };
                tokio::select! {
                    _ = both => true,
                    _ = lingering => false,
                }
            };
            let joined = async { tokio::join!(wait, drains) };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep(self.timeout) => Interrupt::TimedOut,
                (status, drained) = joined => Interrupt::Finished { status, drained },
            }
        };

        match interrupt {
            Interrupt::Finished { status, drained } => {
                let termination = match status {
                    Ok(Some(code)) => Termination::Exited(code),
                    Ok(None) => Termination::Signaled,
                    Err(err) => {
                        warn!("waiting for worker failed: {err}");
                        Termination::Unknown
                    }
                };
                if !drained {
                    warn!(
                        "worker output still open {:?} after exit; killing leftover processes",
                        self.kill_grace
                    );
                    if let Err(err) = process.kill().await {
                        warn!("killing leftover worker processes failed: {err}");
                    }
                }
                debug!(
                    "worker finished {:?} stdout_bytes={} stderr_kept_bytes={}",
                    termination,
                    primary_buf.len(),
                    diagnostic_buf.len()
                );
                Some(RawOutcome {
                    primary: primary_buf,
                    diagnostic: diagnostic_buf,
                    termination,
                })
            }
            Interrupt::Cancelled => {
                debug!("job cancelled; terminating worker");
                self.terminate(&mut *process).await;
                None
            }
            Interrupt::TimedOut => {
                warn!("worker exceeded timeout ({:?}); terminating", self.timeout);
                self.terminate(&mut *process).await;
                Some(RawOutcome::absent(Termination::TimedOut))
            }
        }
    }

    async fn terminate(&self, process: &mut dyn WorkerProcess) {
        if let Err(err) = process.kill().await {
            warn!("killing worker failed: {err}");
        }
        if tokio::time::timeout(self.kill_grace, process.wait())
            .await
            .is_err()
        {
            warn!("worker still running {:?} after kill", self.kill_grace);
        }
    }
}

async fn drain_primary(mut stream: OutputStream, buf: &mut Vec<u8>) {
    loop {
        match stream.read_buf(buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("reading worker stdout failed after {} bytes: {err}", buf.len());
                break;
            }
        }
    }
}

async fn drain_diagnostic(stream: OutputStream, filter: &NoiseFilter, kept: &mut String) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end_matches(['\r', '\n']);
                if filter.retain(text) {
                    kept.push_str(text);
                    kept.push('\n');
                }
            }
            Err(err) => {
                warn!("reading worker stderr failed: {err}");
                break;
            }
        }
    }
}
