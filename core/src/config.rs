use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::runtime::PollPolicy;

/// Everything the orchestrator needs besides the OpenAI credentials, which
/// [`crate::llm::Brain`] reads itself.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub tool_service_url: String,
    pub tool_timeout: Duration,
    pub poll: PollPolicy,
    pub run_deadline: Duration,
    pub analysis_days: i64,
    pub roles_path: Option<String>,
    pub bindings_path: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tool_service_url: "http://localhost:5003".to_string(),
            tool_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
            run_deadline: Duration::from_secs(600),
            analysis_days: 30,
            roles_path: None,
            bindings_path: "assistants.json".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    // Split out so tests don't have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll = PollPolicy {
            interval: parse_or(&lookup, "RISKFLOW_POLL_INTERVAL_MS", defaults.poll.interval.as_millis() as u64)
                .map(Duration::from_millis)?,
            jitter: parse_or(&lookup, "RISKFLOW_POLL_JITTER_MS", defaults.poll.jitter.as_millis() as u64)
                .map(Duration::from_millis)?,
            error_backoff: defaults.poll.error_backoff,
        };

        Ok(Self {
            tool_service_url: lookup("RISKFLOW_TOOL_SERVICE_URL").unwrap_or(defaults.tool_service_url),
            tool_timeout: parse_or(&lookup, "RISKFLOW_TOOL_TIMEOUT_SECS", defaults.tool_timeout.as_secs())
                .map(Duration::from_secs)?,
            poll,
            run_deadline: parse_or(&lookup, "RISKFLOW_RUN_DEADLINE_SECS", defaults.run_deadline.as_secs())
                .map(Duration::from_secs)?,
            analysis_days: parse_or(&lookup, "RISKFLOW_ANALYSIS_DAYS", defaults.analysis_days)?,
            roles_path: lookup("RISKFLOW_ROLES_PATH").filter(|p| !p.is_empty()),
            bindings_path: lookup("RISKFLOW_BINDINGS_PATH").unwrap_or(defaults.bindings_path),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.tool_service_url, "http://localhost:5003");
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.analysis_days, 30);
        assert!(config.roles_path.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[
            ("RISKFLOW_TOOL_SERVICE_URL", "http://tools:5003"),
            ("RISKFLOW_POLL_INTERVAL_MS", "500"),
            ("RISKFLOW_POLL_JITTER_MS", "0"),
            ("RISKFLOW_RUN_DEADLINE_SECS", "90"),
            ("RISKFLOW_ROLES_PATH", "roles.json"),
        ]))
        .unwrap();
        assert_eq!(config.tool_service_url, "http://tools:5003");
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.poll.jitter, Duration::ZERO);
        assert_eq!(config.run_deadline, Duration::from_secs(90));
        assert_eq!(config.roles_path.as_deref(), Some("roles.json"));
    }

    #[test]
    fn garbage_numbers_are_reported_with_the_key() {
        let err = OrchestratorConfig::from_lookup(lookup_from(&[(
            "RISKFLOW_RUN_DEADLINE_SECS",
            "ten",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("RISKFLOW_RUN_DEADLINE_SECS"));
    }
}
