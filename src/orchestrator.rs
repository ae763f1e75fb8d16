//! Evaluation protocol
//!
//! Apply the prediction (falling back once to its minimal rewrite), prove it
//! reverts cleanly, reapply it under its committed label, apply the test
//! patch, and run the tests. The first failing step decides the outcome.

use crate::config::EvalConfig;
use crate::instance::TaskInstance;
use crate::minimal::{MinimalPatch, PatchReducer};
use crate::outcome::{FailureReason, Outcome};
use crate::patch_type::PatchType;
use crate::session::{with_session, EnvSession};
use crate::testbed::GitTestbed;
use anyhow::Result;
use tracing::{debug, info, warn};

/// What one evaluation did, beyond its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Outcome,
    /// Committed label the prediction was reapplied under, once one was chosen.
    pub applied_patch_type: Option<PatchType>,
    /// The prediction text actually used: the raw patch or its minimal rewrite.
    pub resolved_prediction: Option<String>,
    /// Result of the revert probe; `None` if the probe never ran.
    pub reversible: Option<bool>,
}

/// Evaluate the configured instance in its git testbed.
pub fn run(config: &EvalConfig) -> Result<Evaluation> {
    info!(
        "Instance ID: {} | Testbed: {} | Log dir: {}",
        config.instance.instance_id,
        config.testbed_name,
        config.log_dir.display()
    );
    let session_config = config.session_config();
    with_session(
        || GitTestbed::open(&session_config),
        |testbed| evaluate(&config.instance, testbed, &MinimalPatch),
    )
}

pub fn evaluate<S, R>(instance: &TaskInstance, session: &mut S, reducer: &R) -> Evaluation
where
    S: EnvSession + ?Sized,
    R: PatchReducer + ?Sized,
{
    let mut active_patch = instance.prediction_patch.clone();
    let mut patch_type = PatchType::PredTry;

    if !session.apply(active_patch.as_deref(), patch_type, false) {
        // No prediction means nothing to minimize; the committed apply below
        // settles the outcome.
        if let Some(raw) = instance.non_empty_prediction() {
            let minimal = reducer.reduce(raw);
            debug!(
                "Retrying with minimal patch ({} -> {} bytes)",
                raw.len(),
                minimal.len()
            );
            active_patch = Some(minimal);
            patch_type = PatchType::PredMinimalTry;

            if !session.apply(active_patch.as_deref(), patch_type, false) {
                warn!("Failed to apply prediction patch");
                return Evaluation {
                    outcome: Outcome::Failure(FailureReason::PatchDidNotApply),
                    applied_patch_type: None,
                    resolved_prediction: active_patch,
                    reversible: None,
                };
            }
        }
    }

    let reversible = verify_reversible(session, active_patch.as_deref(), patch_type);

    let committed = patch_type.committed();
    let passed = session.apply(active_patch.as_deref(), committed, false)
        && session.apply(Some(instance.test_patch.as_str()), PatchType::Test, false)
        && session.run_tests(instance);

    let outcome = if passed {
        info!("Evaluation succeeded");
        Outcome::Success
    } else {
        warn!("Evaluation failed");
        Outcome::Failure(FailureReason::EvaluationFailed)
    };

    Evaluation {
        outcome,
        applied_patch_type: Some(committed),
        resolved_prediction: active_patch,
        reversible: Some(reversible),
    }
}

/// Revert the speculative application so the committed one starts from the
/// pre-patch tree. The result does not gate the evaluation.
pub fn verify_reversible<S>(session: &mut S, patch: Option<&str>, patch_type: PatchType) -> bool
where
    S: EnvSession + ?Sized,
{
    let reverted = session.apply(patch, patch_type, true);
    debug!(
        "Revert probe for {} patch {} (result not used)",
        patch_type,
        if reverted { "succeeded" } else { "failed" }
    );
    reverted
}
