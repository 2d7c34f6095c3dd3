use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::host::HttpSettings;
use crate::policy::{default_rules, Rule, WILDCARD};
use crate::transform::{LOAD_PHASE, PHASES};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_NETWORK_PHASE: &str = "download";

#[derive(Debug, Deserialize, Default)]
struct TransformConfigFile {
    policy: Option<PolicyConfigFile>,
    network_phases: Option<Vec<String>>,
    http: Option<HttpConfigFile>,
    deadline_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    rules: Option<Vec<Rule>>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub rules: Vec<Rule>,
    pub network_phases: Vec<String>,
    pub http: HttpSettings,
    pub deadline: Option<Duration>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            network_phases: vec![DEFAULT_NETWORK_PHASE.to_string()],
            http: HttpSettings::default(),
            deadline: None,
        }
    }
}

impl TransformConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRANSFORM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TransformConfigFile) -> Result<Self> {
        let rules = file
            .policy
            .and_then(|policy| policy.rules)
            .unwrap_or_else(default_rules);
        let network_phases = file
            .network_phases
            .unwrap_or_else(|| vec![DEFAULT_NETWORK_PHASE.to_string()]);
        let defaults = HttpSettings::default();
        let http = HttpSettings {
            timeout: Duration::from_secs(
                file.http
                    .as_ref()
                    .and_then(|http| http.timeout_secs)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            user_agent: file
                .http
                .and_then(|http| http.user_agent)
                .unwrap_or(defaults.user_agent),
        };
        Ok(Self {
            rules,
            network_phases,
            http,
            deadline: file.deadline_secs.map(Duration::from_secs),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(phases) = std::env::var("TRANSFORM_NETWORK_PHASES") {
            // an explicitly empty list turns the network off for every phase
            self.network_phases = split_csv(&phases);
        }
        if let Ok(timeout) = std::env::var("TRANSFORM_HTTP_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("TRANSFORM_HTTP_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.http.timeout = Duration::from_secs(seconds);
        }
        if let Ok(agent) = std::env::var("TRANSFORM_USER_AGENT") {
            if !agent.trim().is_empty() {
                self.http.user_agent = agent;
            }
        }
        if let Ok(deadline) = std::env::var("TRANSFORM_DEADLINE_SECS") {
            let seconds: u64 = deadline.parse().map_err(|_| {
                anyhow!("TRANSFORM_DEADLINE_SECS must be an integer number of seconds")
            })?;
            self.deadline = Some(Duration::from_secs(seconds));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.http.timeout.as_secs() == 0 {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        for phase in &self.network_phases {
            if !PHASES.contains(&phase.as_str()) {
                return Err(anyhow!(
                    "unknown network phase {phase}; expected one of {}",
                    PHASES.join(", ")
                ));
            }
        }
        for rule in &self.rules {
            let known = rule.phase == WILDCARD
                || rule.phase == LOAD_PHASE
                || PHASES.contains(&rule.phase.as_str());
            if !known {
                return Err(anyhow!("policy rule names unknown phase {}", rule.phase));
            }
            if rule.method.trim().is_empty() {
                return Err(anyhow!("policy rule for phase {} has an empty method", rule.phase));
            }
        }
        self.network_phases.dedup();
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TransformConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
