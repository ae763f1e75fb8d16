use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Neither the raw nor the minimal prediction applied.
    PatchDidNotApply,
    /// Committed reapply, test patch, or test run failed.
    EvaluationFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::PatchDidNotApply => f.write_str("prediction patch did not apply"),
            FailureReason::EvaluationFailed => f.write_str("evaluation failed"),
        }
    }
}

/// Terminal result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureReason),
}

impl Outcome {
    /// Process exit status: 0 on success, 1 on any failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure(_) => 1,
        }
    }
}
