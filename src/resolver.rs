use crate::collector::{RawOutcome, Termination};
use crate::config::Config;
use crate::util::truncate_chars;
use crate::worker::WorkerPayload;
use serde_json::Value;

pub const NOTE_NOT_INSTALLED: &str = "worker not installed";
pub const NOTE_SPAWN_FAILED: &str = "worker failed to start";
pub const NOTE_TIMED_OUT: &str = "worker timed out";
pub const NOTE_NO_OUTPUT: &str = "no output from worker";
pub const NOTE_UNDECODABLE: &str = "worker output could not be decoded";
pub const NOTE_NONZERO_EXIT: &str = "worker exited with non-zero status";

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResult {
    Success {
        is_authentic: bool,
        confidence: f64,
        regenerated_artifact_path: Option<String>,
    },
    PipelineError {
        message: String,
    },
    DecodeFailure {
        raw_sample: String,
    },
    NoOutput,
}

impl DecodedResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DecodedResult::Success { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DecodedResult::Success { .. } => "success",
            DecodedResult::PipelineError { .. } => "pipeline_error",
            DecodedResult::DecodeFailure { .. } => "decode_failure",
            DecodedResult::NoOutput => "no_output",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub result: DecodedResult,
    /// Reason attached to degraded responses.
    pub note: Option<&'static str>,
}

impl Resolution {
    fn new(result: DecodedResult, note: Option<&'static str>) -> Self {
        Self { result, note }
    }

    /// A decodable payload rejected only because the worker did not exit cleanly.
    pub fn is_exit_rejection(&self) -> bool {
        self.note == Some(NOTE_NONZERO_EXIT)
    }
}

#[derive(Debug, Clone)]
pub struct OutcomeResolver {
    sample_chars: usize,
    strict_exit_status: bool,
}

impl OutcomeResolver {
    pub fn new(sample_chars: usize, strict_exit_status: bool) -> Self {
        Self {
            sample_chars,
            strict_exit_status,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.worker.sample_chars, cfg.worker.strict_exit_status)
    }

    /// Classifies a finished run. Parsed content wins over the exit status
    /// unless `strict_exit_status` is set.
    pub fn resolve(&self, raw: &RawOutcome) -> Resolution {
        match raw.termination {
            Termination::Unavailable => {
                return Resolution::new(DecodedResult::NoOutput, Some(NOTE_NOT_INSTALLED));
            }
            Termination::SpawnFailed => {
                return Resolution::new(DecodedResult::NoOutput, Some(NOTE_SPAWN_FAILED));
            }
            Termination::TimedOut => {
                return Resolution::new(DecodedResult::NoOutput, Some(NOTE_TIMED_OUT));
            }
            Termination::Exited(_) | Termination::Signaled | Termination::Unknown => {}
        }

        let text = String::from_utf8_lossy(&raw.primary);
        let text = text.trim();
        if text.is_empty() {
            return Resolution::new(DecodedResult::NoOutput, Some(NOTE_NO_OUTPUT));
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return self.undecodable(text, NOTE_UNDECODABLE),
        };

        if let Some(message) = error_marker(&value) {
            return Resolution::new(DecodedResult::PipelineError { message }, None);
        }

        let payload: WorkerPayload = match serde_json::from_value(value) {
            Ok(p) => p,
            Err(_) => return self.undecodable(text, NOTE_UNDECODABLE),
        };

        if self.strict_exit_status && raw.termination != Termination::Exited(0) {
            return self.undecodable(text, NOTE_NONZERO_EXIT);
        }

        let confidence = if payload.detection.confidence.is_finite() {
            payload.detection.confidence.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Resolution::new(
            DecodedResult::Success {
                is_authentic: !payload.detection.is_deepfake,
                confidence,
                regenerated_artifact_path: payload.regenerated_path(),
            },
            None,
        )
    }

    fn undecodable(&self, text: &str, note: &'static str) -> Resolution {
        Resolution::new(
            DecodedResult::DecodeFailure {
                raw_sample: truncate_chars(text, self.sample_chars).to_string(),
            },
            Some(note),
        )
    }
}

/// Message of a payload whose `pipeline_status` is `"error"`.
fn error_marker(value: &Value) -> Option<String> {
    if value.get("pipeline_status").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let message = match value.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Null) | None => "unknown pipeline error".to_string(),
        Some(Value::String(_)) => "unknown pipeline error".to_string(),
        Some(other) => other.to_string(),
    };
    Some(message)
}
