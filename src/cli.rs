use crate::{
    config::Config,
    intake,
    pipeline::Pipeline,
    response::{Envelope, UrlScheme},
    util::ensure_dir,
    worker::ProcessWorker,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "unai-detect")]
#[command(about = "Deepfake detection job orchestrator (intake + external worker + outcome resolution)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./unai-detect.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report worker availability and effective settings.
    Doctor {},
    /// Analyze one or more images concurrently.
    Analyze {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Declared MIME type applied to every input.
        #[arg(long)]
        content_type: Option<String>,
    },
    /// List regenerated artifacts.
    Files {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = if cfg_path.exists() {
        Config::load(&cfg_path)?
    } else {
        Config::default()
    };

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    if cfg.debug.dump_effective_config {
        ensure_dir(Path::new(&cfg.paths.uploads_dir))?;
        let raw = toml::to_string(&cfg).unwrap_or_default();
        std::fs::write(
            Path::new(&cfg.paths.uploads_dir).join("effective-config.toml"),
            raw,
        )?;
    }

    match args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Analyze {
            inputs,
            content_type,
        } => analyze(&cfg, &inputs, content_type.as_deref()),
        Command::Files {} => files(&cfg),
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("unai-detect.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("unai-detect.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON results, so logs go to stderr.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.uploads_dir).join("unai-detect.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let worker = ProcessWorker::new(cfg);
    if !worker.is_available() {
        error!(
            "worker entry point missing: {}",
            worker.entry_point().display()
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "interpreter": worker.interpreter(),
            "entry_point": worker.entry_point(),
            "available": worker.is_available(),
            "timeout_seconds": cfg.worker.timeout_seconds,
            "env": cfg.worker.env,
            "noise_markers": cfg.worker.noise_markers,
            "images_dir": cfg.images_dir(),
            "regenerated_dir": cfg.regenerated_dir(),
        }))?
    );
    Ok(())
}

fn files(cfg: &Config) -> Result<()> {
    let dir = cfg.regenerated_dir();
    let urls = UrlScheme::from_config(cfg);
    let entries = intake::list_artifacts(&dir, urls.regenerated_base())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "regenerated_path": dir,
            "directory_exists": dir.exists(),
            "files_count": entries.len(),
            "files": entries,
        }))?
    );
    Ok(())
}

fn analyze(cfg: &Config, inputs: &[PathBuf], content_type: Option<&str>) -> Result<()> {
    intake::prepare_dirs(cfg)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;
    let failures = runtime.block_on(analyze_all(cfg, inputs, content_type))?;
    if failures > 0 {
        bail!("{failures} of {} job(s) did not succeed", inputs.len());
    }
    Ok(())
}

async fn analyze_all(cfg: &Config, inputs: &[PathBuf], content_type: Option<&str>) -> Result<usize> {
    let pipeline = Arc::new(Pipeline::new(cfg, ProcessWorker::new(cfg)));
    let permits = Arc::new(Semaphore::new(cfg.limits.max_concurrent_jobs));
    let cancel = CancellationToken::new();
    let mut jobs = JoinSet::new();
    let mut failures = 0usize;

    for input in inputs {
        let artifact = match intake::store_file(cfg, input, content_type) {
            Ok(a) => a,
            Err(err) => {
                warn!("rejected {}: {err}", input.display());
                print_json(&serde_json::json!({
                    "input": input,
                    "success": false,
                    "message": err.to_string(),
                }))?;
                failures += 1;
                continue;
            }
        };

        let pipeline = Arc::clone(&pipeline);
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();
        let input = input.clone();
        jobs.spawn(async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => return (input, None),
            };
            let job = pipeline.job(artifact);
            let outcome = pipeline.run_job_cancellable(job, &cancel).await;
            (input, outcome)
        });
    }

    let mut abandoned = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                warn!("interrupted; terminating {} running job(s)", jobs.len());
                cancel.cancel();
            }
            next = jobs.join_next() => match next {
                None => break,
                Some(Ok((input, Some(result)))) => {
                    let envelope = Envelope::from_result(&result);
                    if !envelope.is_success() {
                        failures += 1;
                    }
                    let mut doc = serde_json::to_value(&envelope)?;
                    if let Some(obj) = doc.as_object_mut() {
                        obj.insert("input".into(), serde_json::json!(input));
                    }
                    print_json(&doc)?;
                }
                Some(Ok((input, None))) => {
                    info!("job for {} abandoned", input.display());
                    abandoned += 1;
                }
                Some(Err(err)) => {
                    error!("job task failed: {err}");
                    failures += 1;
                }
            }
        }
    }

    Ok(failures + abandoned)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
