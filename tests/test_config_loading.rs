//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use team_orchestrator::config::{ConfigError, TeamConfig};
use tempfile::NamedTempFile;

fn write_config(body: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{body}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[paths]
root = "/srv/game"
state_file = "state/runtime.json"

[runtime]
profile = "full"
max_output_format_retries = 2

[workflow]
roles = ["orchestrator", "coder", "qa"]
default_pipeline = ["coder", "qa"]
default_debate = ["coder", "qa"]

[[router.default_chain]]
backend = "codex"
model = "gpt-5"

[[router.default_chain]]
backend = "opencode"
model = "qwen-coder"

[[router.roles.qa]]
backend = "OpenCode"
model = " small "

[quota]
defer_minutes_on_exhausted_models = 15
"#,
    );

    let config = TeamConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.paths.state_path(), PathBuf::from("/srv/game/state/runtime.json"));
    assert_eq!(config.runtime.profile, "full");
    assert_eq!(config.runtime.max_output_format_retries, 2);
    assert_eq!(config.workflow.roles, vec!["orchestrator", "coder", "qa"]);
    assert_eq!(config.workflow.debate_moderator, "orchestrator");
    assert_eq!(config.router.default_chain.len(), 2);
    assert_eq!(config.router.default_chain[1].backend, "opencode");
    assert_eq!(config.router.roles["qa"][0].backend, "OpenCode");
    assert_eq!(config.quota.defer_minutes_on_exhausted_models, 15);
    assert!(config.quota.defer_on_exhausted_models);
}

#[test]
fn test_config_applies_defaults_when_sections_missing() {
    let temp_file = write_config("[runtime]\nuse_docker = true\n");

    let config = TeamConfig::load_from_file(temp_file.path()).unwrap();

    assert!(config.runtime.use_docker);
    assert_eq!(config.runtime.profile, "low-spec");
    assert_eq!(config.runtime.model_run_timeout_sec, 180);
    assert_eq!(config.router.max_model_attempts_per_task, 3);
    assert_eq!(config.workflow.default_debate, vec!["council_red", "council_blue", "council_green"]);
    assert_eq!(config.runner.codex_binary, "codex");
    assert!(config.workspaces.use_role_workspaces_if_present);
}

#[test]
fn test_config_rejects_malformed_toml() {
    let temp_file = write_config("[runtime\nprofile = ");

    let result = TeamConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_wrong_types() {
    let temp_file = write_config("[runtime]\nmax_active_sessions = \"two\"\n");

    assert!(matches!(
        TeamConfig::load_from_file(temp_file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_config_validation_runs_on_load() {
    let blank_moderator = write_config("[workflow]\ndebate_moderator = \"  \"\n");
    let zero_timeout = write_config("[runtime]\nmodel_run_timeout_sec = 0\n");
    let no_roles = write_config("[workflow]\nroles = []\n");

    for file in [&blank_moderator, &zero_timeout, &no_roles] {
        let result = TeamConfig::load_from_file(file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "expected validation failure for {:?}",
            file.path()
        );
    }
}

#[test]
fn test_unknown_backend_in_chain_is_rejected_on_load() {
    let default_chain = write_config("[[router.default_chain]]\nbackend = \"claude\"\nmodel = \"\"\n");
    let role_chain = write_config(
        "[[router.roles.qa]]\nbackend = \"opencode\"\nmodel = \"m1\"\n\n\
         [[router.roles.qa]]\nbackend = \"gemini\"\nmodel = \"m2\"\n",
    );

    for file in [&default_chain, &role_chain] {
        let result = TeamConfig::load_from_file(file.path());
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(ref message)) if message.contains("unsupported backend")),
            "expected backend rejection for {:?}",
            file.path()
        );
    }
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let result = TeamConfig::discover(Some(Path::new("/nonexistent/team.toml")));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_overrides_replace_file_values() {
    let temp_file = write_config("[runtime]\nprofile = \"full\"\nmax_active_sessions = 4\n");
    let mut config = TeamConfig::load_from_file(temp_file.path()).unwrap();
    let env: HashMap<&str, &str> = [
        ("TEAM_PROFILE", "tiny"),
        ("MAX_ACTIVE_SESSIONS", "1"),
        ("TEAM_PROJECT_ROOT", "/work/shared"),
        ("MODEL_RUN_TIMEOUT_SEC", "60"),
    ]
    .into_iter()
    .collect();

    config
        .apply_overrides_from(|name| env.get(name).map(|value| value.to_string()))
        .unwrap();

    assert_eq!(config.runtime.profile, "tiny");
    assert_eq!(config.runtime.max_active_sessions, 1);
    assert_eq!(
        config.workspaces.project_root_override,
        Some(PathBuf::from("/work/shared"))
    );
    assert_eq!(config.runtime.model_run_timeout_sec, 60);
}

#[test]
fn test_invalid_override_names_the_variable() {
    let mut config = TeamConfig::default();

    let err = config
        .apply_overrides_from(|name| (name == "MODEL_DEFER_MINUTES").then(|| "soon".to_string()))
        .unwrap_err();

    match err {
        ConfigError::InvalidEnv { var, value } => {
            assert_eq!(var, "MODEL_DEFER_MINUTES");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_config_error_messages_are_readable() {
    let err = ConfigError::InvalidConfig("[workflow] roles must name at least one role".into());
    assert_eq!(
        err.to_string(),
        "Invalid configuration: [workflow] roles must name at least one role"
    );
}
