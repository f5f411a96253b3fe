//! Project settings (`strata.json`).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchMode;
use crate::error::{Error, Result};
use crate::naming;
use crate::paths;
use crate::retry::{RetryPolicy, DEFAULT_INITIAL_DELAY_SECS, DEFAULT_MAX_ATTEMPTS};
use crate::stack::{WaitPolicy, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL_SECS};
use crate::utils::io::read_file;

pub const ENDPOINT_ENV: &str = "STRATA_ENDPOINT";
pub const REGION_ENV: &str = "STRATA_REGION";

/// Root structure of `strata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Prefix of every external stack name.
    pub project_code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_environments_file")]
    pub environments_file: String,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub wait: WaitSettings,

    #[serde(default)]
    pub capabilities: CapabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Run sibling subtrees on their own threads.
    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
        }
    }
}

/// Directories of command-backed capability manifests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolver_dirs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_dirs: Vec<String>,
}

fn default_environments_file() -> String {
    paths::DEFAULT_ENVIRONMENTS_FILE.to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_secs() -> u64 {
    DEFAULT_INITIAL_DELAY_SECS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_polls() -> u32 {
    DEFAULT_MAX_POLLS
}

impl Settings {
    /// Parse settings text, apply overrides from `lookup` and validate.
    pub fn parse(
        content: &str,
        source: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings: Settings =
            serde_json::from_str(content).map_err(|e| Error::config_invalid_json(source, e))?;

        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.is_empty()) {
            settings.endpoint = Some(endpoint);
        }
        if let Some(region) = lookup(REGION_ENV).filter(|v| !v.is_empty()) {
            settings.region = Some(region);
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.project_code.trim().is_empty() {
            return Err(Error::config_missing_key(
                "project_code",
                Some(paths::SETTINGS_FILE.to_string()),
            ));
        }

        naming::validate_external_name(&self.project_code).map_err(|_| {
            Error::config_invalid_value(
                "project_code",
                Some(self.project_code.clone()),
                "Must start with a letter and contain only letters, digits and '-'",
            )
        })?;

        if self.retry.max_attempts == 0 {
            return Err(Error::config_invalid_value(
                "retry.max_attempts",
                Some("0".to_string()),
                "At least one attempt is required",
            ));
        }

        if self.wait.max_polls == 0 {
            return Err(Error::config_invalid_value(
                "wait.max_polls",
                Some("0".to_string()),
                "At least one poll is required",
            ));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts, self.retry.initial_delay_secs)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval_secs: self.wait.poll_interval_secs,
            max_polls: self.wait.max_polls,
        }
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.dispatch.parallel {
            DispatchMode::Parallel
        } else {
            DispatchMode::Sequential
        }
    }
}

/// Load `strata.json` from `project_dir`, with process environment overrides.
pub fn load(project_dir: &Path) -> Result<Settings> {
    let path = paths::settings_file(project_dir);
    let content = read_file(&path, "read project settings")
        .map_err(|e| e.with_hint(format!("Create {} in the project directory", paths::SETTINGS_FILE)))?;

    Settings::parse(&content, &path.display().to_string(), |key| {
        std::env::var(key).ok()
    })
}
