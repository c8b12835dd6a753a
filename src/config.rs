use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.timeout_seconds == 0 {
            bail!("worker.timeout_seconds must be greater than zero");
        }
        if self.worker.entry_point.trim().is_empty() {
            bail!("worker.entry_point is empty");
        }
        if self.limits.allowed_extensions.is_empty() {
            bail!("limits.allowed_extensions is empty");
        }
        if self.limits.max_concurrent_jobs == 0 {
            bail!("limits.max_concurrent_jobs must be greater than zero");
        }
        Ok(())
    }

    pub fn images_dir(&self) -> PathBuf {
        Path::new(&self.paths.uploads_dir).join(&self.paths.images_subdir)
    }

    pub fn regenerated_dir(&self) -> PathBuf {
        Path::new(&self.paths.uploads_dir).join(&self.paths.regenerated_subdir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub uploads_dir: String,
    pub images_subdir: String,
    pub regenerated_subdir: String,
    /// URL prefix the uploads directory is served under.
    pub public_prefix: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            uploads_dir: "uploads".into(),
            images_subdir: "images".into(),
            regenerated_subdir: "regenerated".into(),
            public_prefix: "/uploads".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub max_concurrent_jobs: usize,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "gif", "bmp", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Program used to run the entry point. Empty runs the entry point directly.
    pub interpreter: String,
    pub entry_point: String,
    pub timeout_seconds: u64,
    /// How long to keep draining output after a forced kill.
    pub kill_grace_millis: u64,
    /// Downgrade a successful payload when the worker exits non-zero.
    pub strict_exit_status: bool,
    /// Upper bound on undecodable output kept for logging.
    pub sample_chars: usize,
    #[serde(default = "default_worker_env")]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_noise_markers")]
    pub noise_markers: Vec<String>,
}
impl Default for Worker {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            entry_point: "python_scripts/detection_pipeline.py".into(),
            timeout_seconds: 300,
            kill_grace_millis: 2000,
            strict_exit_status: false,
            sample_chars: 500,
            env: default_worker_env(),
            noise_markers: default_noise_markers(),
        }
    }
}

fn default_worker_env() -> BTreeMap<String, String> {
    [
        ("TF_CPP_MIN_LOG_LEVEL", "3"),
        ("TF_ENABLE_ONEDNN_OPTS", "0"),
        ("PYTHONWARNINGS", "ignore"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_noise_markers() -> Vec<String> {
    vec![
        "tensorflow/core".into(),
        "oneDNN".into(),
        "This TensorFlow binary".into(),
        "AVX2".into(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub log_worker_diagnostics: bool,
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            log_worker_diagnostics: true,
            dump_effective_config: false,
        }
    }
}
