use crate::config::Config;
use crate::resolver::{DecodedResult, NOTE_NO_OUTPUT, NOTE_UNDECODABLE, Resolution};
use crate::util::now_rfc3339;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEGRADED_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResponse {
    pub id: String,
    pub is_deepfake: bool,
    pub confidence: f64,
    pub original_artifact_url: String,
    pub regenerated_artifact_url: Option<String>,
    pub processing_time_ms: u64,
    pub timestamp: String,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The worker ran and reported that it could not produce a result.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Pipeline processing failed: {message}")]
pub struct PipelineFailure {
    pub message: String,
}

/// Maps stored file names to the public paths they are served under.
#[derive(Debug, Clone)]
pub struct UrlScheme {
    images_base: String,
    regenerated_base: String,
}

impl UrlScheme {
    pub fn new(public_prefix: &str, images_subdir: &str, regenerated_subdir: &str) -> Self {
        let prefix = public_prefix.trim_end_matches('/');
        Self {
            images_base: format!("{}/{}", prefix, images_subdir.trim_matches('/')),
            regenerated_base: format!("{}/{}", prefix, regenerated_subdir.trim_matches('/')),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            &cfg.paths.public_prefix,
            &cfg.paths.images_subdir,
            &cfg.paths.regenerated_subdir,
        )
    }

    pub fn regenerated_base(&self) -> &str {
        &self.regenerated_base
    }

    pub fn original_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.images_base, file_name)
    }

    /// Only the file name of the worker's output path is ever exposed.
    pub fn regenerated_url(&self, output_path: &str) -> Option<String> {
        let name = Path::new(output_path).file_name()?.to_str()?;
        Some(format!("{}/{}", self.regenerated_base, name))
    }
}

impl DetectionResponse {
    /// Builds the caller-facing result. A worker-reported error is the only
    /// outcome that does not yield a response.
    pub fn compose(
        resolution: &Resolution,
        artifact_file_name: &str,
        urls: &UrlScheme,
        elapsed: Duration,
    ) -> Result<Self, PipelineFailure> {
        let processing_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let original_artifact_url = urls.original_url(artifact_file_name);

        match &resolution.result {
            DecodedResult::PipelineError { message } => Err(PipelineFailure {
                message: message.clone(),
            }),
            DecodedResult::Success {
                is_authentic,
                confidence,
                regenerated_artifact_path,
            } => Ok(Self {
                id: new_id("detection"),
                is_deepfake: !is_authentic,
                confidence: confidence.clamp(0.0, 1.0),
                original_artifact_url,
                regenerated_artifact_url: regenerated_artifact_path
                    .as_deref()
                    .and_then(|p| urls.regenerated_url(p)),
                processing_time_ms,
                timestamp: now_rfc3339(),
                degraded: false,
                note: None,
            }),
            DecodedResult::DecodeFailure { .. } | DecodedResult::NoOutput => {
                let fallback_note = match resolution.result {
                    DecodedResult::NoOutput => NOTE_NO_OUTPUT,
                    _ => NOTE_UNDECODABLE,
                };
                Ok(Self {
                    id: new_id("fallback"),
                    is_deepfake: false,
                    confidence: DEGRADED_CONFIDENCE,
                    original_artifact_url,
                    regenerated_artifact_url: None,
                    processing_time_ms,
                    timestamp: now_rfc3339(),
                    degraded: true,
                    note: Some(resolution.note.unwrap_or(fallback_note).to_string()),
                })
            }
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// JSON document handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Detected {
        success: bool,
        detection: DetectionResponse,
    },
    Failed {
        success: bool,
        message: String,
        error: String,
    },
}

impl Envelope {
    pub fn from_result(result: &Result<DetectionResponse, PipelineFailure>) -> Self {
        match result {
            Ok(detection) => Envelope::Detected {
                success: true,
                detection: detection.clone(),
            },
            Err(failure) => Envelope::Failed {
                success: false,
                message: "Pipeline processing failed".to_string(),
                error: failure.message.clone(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Detected { .. })
    }
}
