use super::{Worker, WorkerError, WorkerHandle, WorkerProcess};
use crate::config::Config;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Runs the analysis worker as a child process: `[interpreter] <entry_point> <artifact>`.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    interpreter: Option<PathBuf>,
    entry_point: PathBuf,
}

impl ProcessWorker {
    pub fn new(cfg: &Config) -> Self {
        Self {
            interpreter: resolve_interpreter(&cfg.worker.interpreter),
            entry_point: expand_tilde(&cfg.worker.entry_point),
        }
    }

    pub fn with_entry_point(interpreter: Option<PathBuf>, entry_point: impl Into<PathBuf>) -> Self {
        Self {
            interpreter,
            entry_point: entry_point.into(),
        }
    }

    pub fn entry_point(&self) -> &Path {
        &self.entry_point
    }

    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.entry_point.exists()
    }
}

impl Worker for ProcessWorker {
    fn invoke(
        &self,
        artifact: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<WorkerHandle, WorkerError> {
        if !self.is_available() {
            return Err(WorkerError::Unavailable(self.entry_point.clone()));
        }

        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.entry_point);
                cmd
            }
            None => Command::new(&self.entry_point),
        };
        cmd.arg(artifact);
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            "spawning worker {} for {}",
            self.entry_point.display(),
            artifact.display()
        );
        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            entry: self.entry_point.clone(),
            source,
        })?;

        let group = if cfg!(unix) { child.id() } else { None };
        let stdout = child
            .stdout
            .take()
            .ok_or(WorkerError::MissingStream("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(WorkerError::MissingStream("stderr"))?;

        Ok(WorkerHandle {
            primary: Box::pin(stdout),
            diagnostic: Box::pin(stderr),
            process: Box::new(ChildProcess { group, child }),
        })
    }
}

/// The spawned child. On unix it leads its own process group, so a kill also
/// reaches anything the worker started.
struct ChildProcess {
    group: Option<u32>,
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        if let Some(pgid) = self.group {
            kill_group(pgid)?;
        }
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> std::io::Result<()> {
    Ok(())
}

fn resolve_interpreter(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("UNAI_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return Some(p);
            }
        }
        return Some(PathBuf::from("python3"));
    }
    Some(expand_tilde(raw))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
