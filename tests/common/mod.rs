#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use unai_detect::{
    collector::{NoiseFilter, StreamCollector},
    config::Config,
    intake::StoredArtifact,
    pipeline::Pipeline,
    resolver::OutcomeResolver,
    response::UrlScheme,
    worker::{Worker, WorkerError, WorkerHandle, WorkerProcess},
};

/// In-memory worker replaying canned output.
#[derive(Clone, Default)]
pub struct ScriptedWorker {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit: Option<i32>,
    pub hang: bool,
    pub invocations: Arc<AtomicUsize>,
    pub killed: Arc<AtomicBool>,
}

impl ScriptedWorker {
    pub fn new(stdout: &str, stderr: &str, exit: i32) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit: Some(exit),
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            exit: None,
            ..Default::default()
        }
    }
}

impl Worker for ScriptedWorker {
    fn invoke(
        &self,
        _artifact: &Path,
        _env: &BTreeMap<String, String>,
    ) -> Result<WorkerHandle, WorkerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerHandle {
            primary: Box::pin(Cursor::new(self.stdout.clone())),
            diagnostic: Box::pin(Cursor::new(self.stderr.clone())),
            process: Box::new(ScriptedProcess {
                exit: self.exit,
                hang: self.hang,
                killed: Arc::clone(&self.killed),
            }),
        })
    }
}

struct ScriptedProcess {
    exit: Option<i32>,
    hang: bool,
    killed: Arc<AtomicBool>,
}

#[async_trait]
impl WorkerProcess for ScriptedProcess {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        if self.hang && !self.killed.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.exit)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn pipeline_with_timeout<W: Worker>(worker: W, timeout: Duration) -> Pipeline<W> {
    let cfg = Config::default();
    Pipeline::with_parts(
        worker,
        StreamCollector::new(
            NoiseFilter::from_config(&cfg),
            timeout,
            Duration::from_millis(500),
        ),
        OutcomeResolver::from_config(&cfg),
        UrlScheme::from_config(&cfg),
        cfg.worker.env.clone(),
    )
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

pub fn artifact(dir: &Path, name: &str) -> StoredArtifact {
    let path = dir.join(name);
    std::fs::write(&path, b"\x89PNG fake").unwrap();
    StoredArtifact {
        path: path.canonicalize().unwrap(),
        file_name: name.to_string(),
        bytes: 9,
    }
}

pub fn test_config(uploads: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.uploads_dir = uploads.display().to_string();
    cfg
}
