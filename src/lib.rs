//! Testbed patch evaluation
//!
//! Applies a predicted patch to a prepared testbed, applies the held-out
//! test patch, runs the task's tests, and reports a single pass/fail
//! outcome. The binary is a thin wrapper; everything testable lives here.

pub mod config;
pub mod diff;
pub mod instance;
pub mod logging;
pub mod minimal;
pub mod orchestrator;
pub mod outcome;
pub mod patch_type;
pub mod session;
pub mod testbed;
pub mod util;
