use crate::{
    collector::{RawOutcome, StreamCollector, Termination},
    config::Config,
    intake::StoredArtifact,
    resolver::{DecodedResult, OutcomeResolver, Resolution},
    response::{DetectionResponse, PipelineFailure, UrlScheme},
    worker::{Worker, WorkerError},
};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// One analysis request. Consumed by [`Pipeline::run_job`].
#[derive(Debug)]
pub struct AnalysisJob {
    pub artifact: StoredArtifact,
    pub started_at: Instant,
    pub worker_env: BTreeMap<String, String>,
}

pub struct Pipeline<W: Worker> {
    worker: W,
    collector: StreamCollector,
    resolver: OutcomeResolver,
    urls: UrlScheme,
    worker_env: BTreeMap<String, String>,
    log_diagnostics: bool,
}

impl<W: Worker> Pipeline<W> {
    pub fn new(cfg: &Config, worker: W) -> Self {
        Self {
            worker,
            collector: StreamCollector::from_config(cfg),
            resolver: OutcomeResolver::from_config(cfg),
            urls: UrlScheme::from_config(cfg),
            worker_env: cfg.worker.env.clone(),
            log_diagnostics: cfg.debug.log_worker_diagnostics,
        }
    }

    pub fn with_parts(
        worker: W,
        collector: StreamCollector,
        resolver: OutcomeResolver,
        urls: UrlScheme,
        worker_env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            worker,
            collector,
            resolver,
            urls,
            worker_env,
            log_diagnostics: true,
        }
    }

    pub fn job(&self, artifact: StoredArtifact) -> AnalysisJob {
        AnalysisJob {
            artifact,
            started_at: Instant::now(),
            worker_env: self.worker_env.clone(),
        }
    }

    pub async fn run_job(&self, job: AnalysisJob) -> Result<DetectionResponse, PipelineFailure> {
        let cancel = CancellationToken::new();
        self.run_job_cancellable(job, &cancel)
            .await
            .unwrap_or_else(|| {
                Err(PipelineFailure {
                    message: "job cancelled".to_string(),
                })
            })
    }

    /// Runs one job to completion. Returns `None` when `cancel` fires before
    /// the outcome is resolved; no response is composed in that case.
    pub async fn run_job_cancellable(
        &self,
        job: AnalysisJob,
        cancel: &CancellationToken,
    ) -> Option<Result<DetectionResponse, PipelineFailure>> {
        let span = info_span!("job", artifact = %job.artifact.file_name);
        self.execute(job, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        job: AnalysisJob,
        cancel: &CancellationToken,
    ) -> Option<Result<DetectionResponse, PipelineFailure>> {
        if cancel.is_cancelled() {
            debug!("job cancelled before the worker started");
            return None;
        }
        info!("processing artifact {}", job.artifact.path.display());

        let raw = match self.worker.invoke(&job.artifact.path, &job.worker_env) {
            Ok(handle) => self.collector.collect(handle, cancel).await?,
            Err(WorkerError::Unavailable(entry)) => {
                error!(
                    "worker entry point missing: {}; serving degraded response",
                    entry.display()
                );
                RawOutcome::absent(Termination::Unavailable)
            }
            Err(err) => {
                error!("worker could not be started: {err}");
                RawOutcome::absent(Termination::SpawnFailed)
            }
        };
        if cancel.is_cancelled() {
            debug!("job abandoned after worker finished; dropping outcome");
            return None;
        }

        let elapsed = job.started_at.elapsed();
        let resolution = self.resolver.resolve(&raw);
        self.log_outcome(&raw, &resolution);

        let result = DetectionResponse::compose(
            &resolution,
            &job.artifact.file_name,
            &self.urls,
            elapsed,
        );
        match &result {
            Ok(resp) if resp.degraded => warn!(
                "degraded response {} note={:?} in {}ms",
                resp.id, resp.note, resp.processing_time_ms
            ),
            Ok(resp) => info!(
                "processing complete: {} (confidence {:.3}) in {}ms",
                if resp.is_deepfake {
                    "deepfake detected"
                } else {
                    "authentic image"
                },
                resp.confidence,
                resp.processing_time_ms
            ),
            Err(failure) => error!("pipeline error: {}", failure.message),
        }
        Some(result)
    }

    fn log_outcome(&self, raw: &RawOutcome, resolution: &Resolution) {
        let result = &resolution.result;
        debug!(
            "worker termination={:?} outcome={}",
            raw.termination,
            result.kind()
        );
        if let DecodedResult::DecodeFailure { raw_sample } = result {
            if resolution.is_exit_rejection() {
                warn!(
                    "discarding worker payload, worker ended with {:?}: {raw_sample}",
                    raw.termination
                );
            } else {
                warn!("undecodable worker output: {raw_sample}");
            }
        }
        if let Some(code) = raw.termination.exit_code().filter(|c| *c != 0) {
            warn!("worker exited with status {code}");
        }
        if self.log_diagnostics && !raw.diagnostic.is_empty() {
            let diagnostic = raw.diagnostic.trim_end();
            if result.is_success() {
                debug!("worker diagnostics:\n{diagnostic}");
            } else {
                warn!("worker diagnostics:\n{diagnostic}");
            }
        }
    }
}
