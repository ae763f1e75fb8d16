//! Task instance records
//!
//! An instance arrives as base64-encoded JSON. Only the fields the evaluation
//! protocol and the testbed read are typed; everything else is carried along
//! untouched in `extra`.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub instance_id: String,
    /// Candidate fix under evaluation. `None` when the predictor produced nothing.
    #[serde(rename = "model_patch", default)]
    pub prediction_patch: Option<String>,
    pub test_patch: String,
    /// Shell command that runs the task's tests inside the testbed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_cmd: Option<String>,
    /// Repo-relative test files restored to HEAD before the test patch lands.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_directives: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskInstance {
    /// Decode the `INSTANCE` transport format.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("INSTANCE is not valid base64")?;
        let text = String::from_utf8(bytes).context("INSTANCE is not valid UTF-8")?;
        serde_json::from_str(&text).context("INSTANCE is not a valid task instance record")
    }

    pub fn to_base64(&self) -> Result<String> {
        let json = serde_json::to_string(self).context("Failed to serialize task instance")?;
        Ok(STANDARD.encode(json))
    }

    /// The prediction, if it is present and non-empty.
    pub fn non_empty_prediction(&self) -> Option<&str> {
        self.prediction_patch
            .as_deref()
            .filter(|patch| !patch.is_empty())
    }
}
