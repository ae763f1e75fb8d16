//! Evaluation configuration
//!
//! Built once at startup from the process environment and passed down
//! explicitly. Nothing below `main` reads the environment.

use crate::instance::TaskInstance;
use crate::session::SessionConfig;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_INSTANCE: &str = "INSTANCE";
pub const ENV_TESTBED_NAME: &str = "TESTBED_NAME";
pub const ENV_TESTBED: &str = "TESTBED";
pub const ENV_LOG_DIR: &str = "LOG_DIR";
pub const ENV_TIMEOUT: &str = "TIMEOUT";
pub const ENV_LOG_SUFFIX: &str = "LOG_SUFFIX";

const REQUIRED_VARS: &[&str] = &[ENV_INSTANCE, ENV_LOG_DIR, ENV_TESTBED, ENV_TESTBED_NAME];

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub instance: TaskInstance,
    pub testbed_name: String,
    pub testbed: PathBuf,
    pub log_dir: PathBuf,
    /// Bound on the test command; `None` lets it run to completion.
    pub timeout: Option<Duration>,
    pub log_suffix: Option<String>,
}

impl EvalConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any name-value source. Every missing required variable
    /// is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| lookup(key).is_none())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(anyhow!(
                "Missing required environment variable(s): {}",
                missing.join(", ")
            ));
        }

        let require = |key: &str| {
            lookup(key).ok_or_else(|| anyhow!("{} environment variable is not set", key))
        };

        let instance = TaskInstance::from_base64(&require(ENV_INSTANCE)?)
            .with_context(|| format!("Failed to decode {}", ENV_INSTANCE))?;

        let timeout = match lookup(ENV_TIMEOUT) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().with_context(|| {
                    format!("{} must be an integer number of seconds, got '{}'", ENV_TIMEOUT, raw)
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            instance,
            testbed_name: require(ENV_TESTBED_NAME)?,
            testbed: PathBuf::from(require(ENV_TESTBED)?),
            log_dir: PathBuf::from(require(ENV_LOG_DIR)?),
            timeout,
            log_suffix: lookup(ENV_LOG_SUFFIX),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            instance_id: self.instance.instance_id.clone(),
            testbed_name: self.testbed_name.clone(),
            testbed: self.testbed.clone(),
            log_dir: self.log_dir.clone(),
            timeout: self.timeout,
            log_suffix: self.log_suffix.clone(),
            test_directives: self.instance.test_directives.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn encoded_instance() -> String {
        let raw = json!({
            "instance_id": "demo__demo-1",
            "model_patch": "",
            "test_patch": "",
        });
        let instance: TaskInstance = serde_json::from_value(raw).unwrap();
        instance.to_base64().unwrap()
    }

    fn full_env() -> HashMap<String, String> {
        HashMap::from([
            (ENV_INSTANCE.to_string(), encoded_instance()),
            (ENV_TESTBED_NAME.to_string(), "demo__1.0".to_string()),
            (ENV_TESTBED.to_string(), "/tmp/testbed/demo".to_string()),
            (ENV_LOG_DIR.to_string(), "/tmp/logs".to_string()),
        ])
    }

    #[test]
    fn test_builds_config_with_optional_values() {
        let mut env = full_env();
        env.insert(ENV_TIMEOUT.to_string(), "900".to_string());
        env.insert(ENV_LOG_SUFFIX.to_string(), "run2".to_string());

        let config = EvalConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.instance.instance_id, "demo__demo-1");
        assert_eq!(config.timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.log_suffix.as_deref(), Some("run2"));

        let session = config.session_config();
        assert_eq!(session.testbed, PathBuf::from("/tmp/testbed/demo"));
        assert_eq!(session.testbed_name, "demo__1.0");
    }

    #[test]
    fn test_optional_values_default_to_none() {
        let env = full_env();
        let config = EvalConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.timeout, None);
        assert_eq!(config.log_suffix, None);
    }

    #[test]
    fn test_reports_every_missing_variable() {
        let mut env = full_env();
        env.remove(ENV_TESTBED);
        env.remove(ENV_LOG_DIR);

        let err = EvalConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("TESTBED"));
        assert!(message.contains("LOG_DIR"));
        assert!(!message.contains("INSTANCE"));
    }

    #[test]
    fn test_rejects_non_integer_timeout() {
        let mut env = full_env();
        env.insert(ENV_TIMEOUT.to_string(), "ten".to_string());
        assert!(EvalConfig::from_lookup(|k| env.get(k).cloned()).is_err());
    }

    #[test]
    fn test_rejects_undecodable_instance() {
        let mut env = full_env();
        env.insert(ENV_INSTANCE.to_string(), "%%%".to_string());
        let err = EvalConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(format!("{:#}", err).contains("INSTANCE"));
    }
}
