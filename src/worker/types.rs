use serde::{Deserialize, Serialize};

/// Final JSON document the worker prints on stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPayload {
    #[serde(default)]
    pub pipeline_status: Option<String>,
    pub detection: DetectionPayload,
    #[serde(default)]
    pub regeneration: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub is_deepfake: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationPayload {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output_path: Option<String>,
}

impl WorkerPayload {
    /// Output path of a successful regeneration. A malformed block counts as none.
    pub fn regenerated_path(&self) -> Option<String> {
        let block = self.regeneration.clone()?;
        let regen: RegenerationPayload = serde_json::from_value(block).ok()?;
        if !regen.success {
            return None;
        }
        regen.output_path.filter(|p| !p.trim().is_empty())
    }
}
