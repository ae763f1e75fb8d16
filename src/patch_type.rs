//! Audit tags for patch application attempts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a given apply (or revert) call was made.
///
/// The tag is bookkeeping only: it names temp files and log lines, and
/// tells the testbed whether a failed apply may reset the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchType {
    /// Speculative first attempt with the raw prediction.
    PredTry,
    /// Speculative retry with the reduced prediction.
    PredMinimalTry,
    /// Committed application of the raw prediction.
    Pred,
    /// Committed application of the reduced prediction.
    PredMinimal,
    /// The held-out test patch.
    Test,
}

impl PatchType {
    pub const ALL: [PatchType; 5] = [
        PatchType::PredTry,
        PatchType::PredMinimalTry,
        PatchType::Pred,
        PatchType::PredMinimal,
        PatchType::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchType::PredTry => "pred_try",
            PatchType::PredMinimalTry => "pred_minimal_try",
            PatchType::Pred => "pred",
            PatchType::PredMinimal => "pred_minimal",
            PatchType::Test => "test",
        }
    }

    /// Committed label for a speculative attempt.
    pub fn committed(self) -> PatchType {
        match self {
            PatchType::PredMinimalTry => PatchType::PredMinimal,
            _ => PatchType::Pred,
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, PatchType::Test)
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_label_resolution() {
        assert_eq!(PatchType::PredMinimalTry.committed(), PatchType::PredMinimal);
        assert_eq!(PatchType::PredTry.committed(), PatchType::Pred);
        assert_eq!(PatchType::Pred.committed(), PatchType::Pred);
    }

    #[test]
    fn test_labels_match_serde_names() {
        let json = serde_json::to_string(&PatchType::PredMinimalTry).unwrap();
        assert_eq!(json, "\"pred_minimal_try\"");
        assert_eq!(PatchType::Test.to_string(), "test");
    }
}
