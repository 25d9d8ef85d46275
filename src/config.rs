//! Team configuration
//!
//! One `TeamConfig` is loaded at startup from TOML, overlaid with environment
//! overrides exactly once, and then passed by reference to every component.
//! A missing configuration file is never fatal: every section has built-in defaults.

use crate::state::{ModelChainEntry, RuntimeKnobs, SUPPORTED_BACKENDS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default locations tried when no `--config` path is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["team.toml", "team/config/team.toml"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TeamConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub quota: QuotaSection,
    #[serde(default)]
    pub workspaces: WorkspaceSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

/// Filesystem layout. Relative paths resolve against `root`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsSection {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_events_file")]
    pub events_file: PathBuf,
    #[serde(default = "default_task_output_dir")]
    pub task_output_dir: PathBuf,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("team/state/runtime_state.json")
}

fn default_events_file() -> PathBuf {
    PathBuf::from("team/state/events.jsonl")
}

fn default_task_output_dir() -> PathBuf {
    PathBuf::from("team/state/task_outputs")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("team/templates/stages")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("team/prompts")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            state_file: default_state_file(),
            events_file: default_events_file(),
            task_output_dir: default_task_output_dir(),
            templates_dir: default_templates_dir(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

impl PathsSection {
    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve(&self.state_file)
    }

    pub fn events_path(&self) -> PathBuf {
        self.resolve(&self.events_file)
    }

    pub fn task_output_path(&self) -> PathBuf {
        self.resolve(&self.task_output_dir)
    }

    pub fn templates_path(&self) -> PathBuf {
        self.resolve(&self.templates_dir)
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.resolve(&self.prompts_dir)
    }
}

/// Runtime knobs copied into the state document on `start`, plus engine limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSection {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_max_active_sessions")]
    pub max_active_sessions: u32,
    #[serde(default = "default_agent_idle_timeout_sec")]
    pub agent_idle_timeout_sec: u64,
    #[serde(default = "default_local_test_scope")]
    pub local_test_scope: String,
    #[serde(default)]
    pub use_docker: bool,
    #[serde(default = "default_true")]
    pub run_full_tests_in_ci: bool,
    /// Correction retries per chain entry after the first attempt
    #[serde(default = "default_max_output_format_retries")]
    pub max_output_format_retries: u32,
    #[serde(default = "default_model_run_timeout_sec")]
    pub model_run_timeout_sec: u64,
}

/// Agent runs are never given less than this many seconds
pub const MIN_MODEL_RUN_TIMEOUT_SEC: u64 = 30;

fn default_profile() -> String {
    "low-spec".to_string()
}

fn default_max_active_sessions() -> u32 {
    2
}

fn default_agent_idle_timeout_sec() -> u64 {
    90
}

fn default_local_test_scope() -> String {
    "smoke".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_output_format_retries() -> u32 {
    1
}

fn default_model_run_timeout_sec() -> u64 {
    180
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            max_active_sessions: default_max_active_sessions(),
            agent_idle_timeout_sec: default_agent_idle_timeout_sec(),
            local_test_scope: default_local_test_scope(),
            use_docker: false,
            run_full_tests_in_ci: true,
            max_output_format_retries: default_max_output_format_retries(),
            model_run_timeout_sec: default_model_run_timeout_sec(),
        }
    }
}

impl RuntimeSection {
    /// Knobs persisted into `RuntimeState.config`
    pub fn knobs(&self) -> RuntimeKnobs {
        RuntimeKnobs {
            profile: self.profile.clone(),
            max_active_sessions: self.max_active_sessions,
            agent_idle_timeout_sec: self.agent_idle_timeout_sec,
            local_test_scope: self.local_test_scope.clone(),
            use_docker: self.use_docker,
            run_full_tests_in_ci: self.run_full_tests_in_ci,
        }
    }

    pub fn effective_timeout_sec(&self) -> u64 {
        self.model_run_timeout_sec.max(MIN_MODEL_RUN_TIMEOUT_SEC)
    }
}

/// Role catalog and default work shapes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSection {
    #[serde(default = "default_role_ids")]
    pub roles: Vec<String>,
    #[serde(default = "default_pipeline_roles")]
    pub default_pipeline: Vec<String>,
    #[serde(default = "default_debate_roles")]
    pub default_debate: Vec<String>,
    #[serde(default = "default_debate_moderator")]
    pub debate_moderator: String,
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn default_role_ids() -> Vec<String> {
    to_strings(&[
        "orchestrator",
        "concept",
        "game_design",
        "narrative",
        "player_experience",
        "coder",
        "reviewer",
        "qa",
        "security",
        "sre",
        "devops",
        "council_red",
        "council_blue",
        "council_green",
    ])
}

pub fn default_pipeline_roles() -> Vec<String> {
    to_strings(&[
        "concept",
        "game_design",
        "narrative",
        "player_experience",
        "coder",
        "reviewer",
        "qa",
        "security",
        "sre",
        "devops",
    ])
}

pub fn default_debate_roles() -> Vec<String> {
    to_strings(&["council_red", "council_blue", "council_green"])
}

pub fn default_debate_moderator() -> String {
    "orchestrator".to_string()
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            roles: default_role_ids(),
            default_pipeline: default_pipeline_roles(),
            default_debate: default_debate_roles(),
            debate_moderator: default_debate_moderator(),
        }
    }
}

/// Per-role backend/model fallback chains
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSection {
    #[serde(default = "default_chain")]
    pub default_chain: Vec<ModelChainEntry>,
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<ModelChainEntry>>,
    #[serde(default = "default_max_model_attempts")]
    pub max_model_attempts_per_task: u32,
}

pub fn default_chain() -> Vec<ModelChainEntry> {
    vec![ModelChainEntry::codex_default()]
}

fn default_max_model_attempts() -> u32 {
    3
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            default_chain: default_chain(),
            roles: BTreeMap::new(),
            max_model_attempts_per_task: default_max_model_attempts(),
        }
    }
}

/// Quota/rate-limit classification and deferral policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaSection {
    #[serde(default = "default_true")]
    pub defer_on_exhausted_models: bool,
    #[serde(default = "default_defer_minutes")]
    pub defer_minutes_on_exhausted_models: i64,
    #[serde(default = "default_quota_markers")]
    pub quota_error_markers: Vec<String>,
}

fn default_defer_minutes() -> i64 {
    45
}

pub fn default_quota_markers() -> Vec<String> {
    to_strings(&[
        "rate limit",
        "quota",
        "limit exceeded",
        "too many requests",
        "429",
        "insufficient credits",
    ])
}

impl Default for QuotaSection {
    fn default() -> Self {
        Self {
            defer_on_exhausted_models: true,
            defer_minutes_on_exhausted_models: default_defer_minutes(),
            quota_error_markers: default_quota_markers(),
        }
    }
}

/// Per-role working directories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceSection {
    #[serde(default = "default_true")]
    pub use_role_workspaces_if_present: bool,
    #[serde(default)]
    pub roles: BTreeMap<String, PathBuf>,
    /// Forces every role into one directory when it exists (`TEAM_PROJECT_ROOT`)
    #[serde(default)]
    pub project_root_override: Option<PathBuf>,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            use_role_workspaces_if_present: true,
            roles: BTreeMap::new(),
            project_root_override: None,
        }
    }
}

/// External agent CLI binaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerSection {
    #[serde(default = "default_codex_binary")]
    pub codex_binary: String,
    #[serde(default = "default_opencode_binary")]
    pub opencode_binary: String,
    #[serde(default = "default_gh_binary")]
    pub gh_binary: String,
    /// Model passed to codex when the chain entry leaves it empty (`CODEX_MODEL`)
    #[serde(default)]
    pub codex_default_model: String,
}

fn default_codex_binary() -> String {
    "codex".to_string()
}

fn default_opencode_binary() -> String {
    "opencode".to_string()
}

fn default_gh_binary() -> String {
    "gh".to_string()
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            codex_binary: default_codex_binary(),
            opencode_binary: default_opencode_binary(),
            gh_binary: default_gh_binary(),
            codex_default_model: String::new(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TeamConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: TeamConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit path if one is given, otherwise the first default path
    /// that exists, otherwise built-in defaults. Environment overrides are applied last.
    ///
    /// An explicitly named file that cannot be loaded is an error; a discovered
    /// default file that fails to parse is logged and replaced by defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration");
                Self::load_from_file(path)?
            }
            None => Self::load_default_paths(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn load_default_paths() -> Self {
        for candidate in DEFAULT_CONFIG_PATHS {
            let path = Path::new(candidate);
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loading configuration");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable configuration, using defaults");
                    return Self::default();
                }
            }
        }
        info!("No configuration file found, using built-in defaults");
        Self::default()
    }

    /// Validate cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.roles.iter().all(|role| role.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "[workflow] roles must name at least one role".to_string(),
            ));
        }
        if self.workflow.debate_moderator.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "[workflow] debate_moderator must not be empty".to_string(),
            ));
        }
        if self.runtime.model_run_timeout_sec == 0 {
            return Err(ConfigError::InvalidConfig(
                "[runtime] model_run_timeout_sec must be positive".to_string(),
            ));
        }
        let chains = std::iter::once(("default_chain", &self.router.default_chain)).chain(
            self.router
                .roles
                .iter()
                .map(|(role, chain)| (role.as_str(), chain)),
        );
        for (name, chain) in chains {
            if let Some(entry) = chain.iter().find(|entry| !entry.has_supported_backend()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "[router] {name} uses unsupported backend '{}' (expected one of: {})",
                    entry.backend.trim(),
                    SUPPORTED_BACKENDS.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("TEAM_STATE_PATH") {
            self.paths.state_file = PathBuf::from(value);
        }
        if let Some(value) = get("TEAM_EVENTS_PATH") {
            self.paths.events_file = PathBuf::from(value);
        }
        if let Some(value) = get("TEAM_PROJECT_ROOT") {
            self.workspaces.project_root_override = Some(PathBuf::from(value));
        }
        if let Some(value) = get("TEAM_PROFILE") {
            self.runtime.profile = value;
        }
        if let Some(value) = get("MAX_ACTIVE_SESSIONS") {
            self.runtime.max_active_sessions = parse_env("MAX_ACTIVE_SESSIONS", &value)?;
        }
        if let Some(value) = get("AGENT_IDLE_TIMEOUT_SEC") {
            self.runtime.agent_idle_timeout_sec = parse_env("AGENT_IDLE_TIMEOUT_SEC", &value)?;
        }
        if let Some(value) = get("LOCAL_TEST_SCOPE") {
            self.runtime.local_test_scope = value;
        }
        if let Some(value) = get("USE_DOCKER") {
            self.runtime.use_docker = parse_flag(&value);
        }
        if let Some(value) = get("RUN_FULL_TESTS_IN_CI") {
            self.runtime.run_full_tests_in_ci = parse_flag(&value);
        }
        if let Some(value) = get("MAX_OUTPUT_FORMAT_RETRIES") {
            self.runtime.max_output_format_retries =
                parse_env("MAX_OUTPUT_FORMAT_RETRIES", &value)?;
        }
        if let Some(value) = get("MODEL_DEFER_MINUTES") {
            self.quota.defer_minutes_on_exhausted_models =
                parse_env("MODEL_DEFER_MINUTES", &value)?;
        }
        if let Some(value) = get("MODEL_RUN_TIMEOUT_SEC") {
            self.runtime.model_run_timeout_sec = parse_env("MODEL_RUN_TIMEOUT_SEC", &value)?;
        }
        if let Some(value) = get("CODEX_MODEL") {
            self.runner.codex_default_model = value;
        }
        Ok(())
    }

    /// Create a configuration rooted in a scratch directory for unit tests
    #[cfg(test)]
    pub fn test_config(root: &Path) -> Self {
        let mut config = Self::default();
        config.paths.root = root.to_path_buf();
        config
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: TeamConfig = toml::from_str("").unwrap();
        assert_eq!(config, TeamConfig::default());
        assert_eq!(config.workflow.roles.len(), 14);
        assert_eq!(config.workflow.default_pipeline.len(), 10);
        assert_eq!(config.workflow.debate_moderator, "orchestrator");
        assert_eq!(config.router.max_model_attempts_per_task, 3);
        assert_eq!(config.quota.defer_minutes_on_exhausted_models, 45);
        assert_eq!(config.runtime.max_output_format_retries, 1);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: TeamConfig = toml::from_str(
            r#"
[runtime]
profile = "full"

[[router.default_chain]]
backend = "opencode"
model = "big-model"
"#,
        )
        .unwrap();

        assert_eq!(config.runtime.profile, "full");
        assert_eq!(config.runtime.max_active_sessions, 2);
        assert_eq!(config.router.default_chain.len(), 1);
        assert_eq!(config.router.default_chain[0].backend, "opencode");
        assert_eq!(config.quota.quota_error_markers, default_quota_markers());
    }

    #[test]
    fn test_timeout_floor() {
        let mut runtime = RuntimeSection::default();
        runtime.model_run_timeout_sec = 5;
        assert_eq!(runtime.effective_timeout_sec(), MIN_MODEL_RUN_TIMEOUT_SEC);
        runtime.model_run_timeout_sec = 600;
        assert_eq!(runtime.effective_timeout_sec(), 600);
    }

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("TEAM_STATE_PATH", "/tmp/state.json"),
            ("MODEL_DEFER_MINUTES", "10"),
            ("USE_DOCKER", "yes"),
            ("RUN_FULL_TESTS_IN_CI", "0"),
            ("CODEX_MODEL", " gpt-x "),
            ("TEAM_PROFILE", ""),
        ]
        .into_iter()
        .collect();

        let mut config = TeamConfig::default();
        config
            .apply_overrides_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.paths.state_file, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.quota.defer_minutes_on_exhausted_models, 10);
        assert!(config.runtime.use_docker);
        assert!(!config.runtime.run_full_tests_in_ci);
        assert_eq!(config.runner.codex_default_model, "gpt-x");
        assert_eq!(config.runtime.profile, "low-spec");
    }

    #[test]
    fn test_env_override_rejects_garbage_numbers() {
        let mut config = TeamConfig::default();
        let result = config.apply_overrides_from(|name| {
            (name == "MAX_OUTPUT_FORMAT_RETRIES").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_rejects_unsupported_backend() {
        let mut config = TeamConfig::default();
        config
            .router
            .roles
            .insert("qa".to_string(), vec![ModelChainEntry::new(" OpenCode ", "m1")]);
        assert!(config.validate().is_ok());

        config.router.roles.insert(
            "coder".to_string(),
            vec![ModelChainEntry::new("codex", ""), ModelChainEntry::new("claude", "m2")],
        );
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("coder"));
        assert!(message.contains("'claude'"));
    }

    #[test]
    fn test_validate_rejects_empty_roles() {
        let mut config = TeamConfig::default();
        config.workflow.roles.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths_resolve_against_root() {
        let config = TeamConfig::test_config(Path::new("/work/project"));
        assert_eq!(
            config.paths.state_path(),
            PathBuf::from("/work/project/team/state/runtime_state.json")
        );
        let mut paths = config.paths.clone();
        paths.events_file = PathBuf::from("/var/log/events.jsonl");
        assert_eq!(paths.events_path(), PathBuf::from("/var/log/events.jsonl"));
    }
}
