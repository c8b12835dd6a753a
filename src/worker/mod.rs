pub mod process;
pub mod types;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use process::ProcessWorker;
pub use types::{DetectionPayload, RegenerationPayload, WorkerPayload};

pub type OutputStream = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker entry point not found: {}", .0.display())]
    Unavailable(PathBuf),
    #[error("spawning worker {}: {source}", .entry.display())]
    Spawn {
        entry: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {0} stream was not captured")]
    MissingStream(&'static str),
}

/// A running worker that can be awaited or terminated.
#[async_trait]
pub trait WorkerProcess: Send {
    /// Resolves once the process is gone. `None` means it died without an exit code.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Everything a started worker exposes: its two output channels and its lifetime.
pub struct WorkerHandle {
    pub primary: OutputStream,
    pub diagnostic: OutputStream,
    pub process: Box<dyn WorkerProcess>,
}

pub trait Worker: Send + Sync {
    /// Starts exactly one analysis run for `artifact`.
    fn invoke(
        &self,
        artifact: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<WorkerHandle, WorkerError>;
}
