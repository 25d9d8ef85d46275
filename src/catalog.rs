//! Role and workflow lookups
//!
//! Pure lookups over the loaded configuration plus the prompt/template text
//! files on disk. Missing files mean "no text", never an error.

use crate::config::{TeamConfig, WorkspaceSection};
use std::fs;
use std::path::{Path, PathBuf};

/// How many roles a debate falls back to when none of the configured ones exist
const FALLBACK_DEBATE_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct RoleCatalog {
    role_ids: Vec<String>,
    default_pipeline: Vec<String>,
    default_debate: Vec<String>,
    moderator: String,
    root: PathBuf,
    templates_dir: PathBuf,
    prompts_dir: PathBuf,
    workspaces: WorkspaceSection,
}

impl RoleCatalog {
    pub fn from_config(config: &TeamConfig) -> Self {
        let clean = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        };

        let role_ids = clean(&config.workflow.roles);
        let mut default_pipeline = clean(&config.workflow.default_pipeline);
        if default_pipeline.is_empty() {
            default_pipeline = crate::config::default_pipeline_roles();
        }
        let mut default_debate = clean(&config.workflow.default_debate);
        if default_debate.is_empty() {
            default_debate = crate::config::default_debate_roles();
        }

        Self {
            role_ids,
            default_pipeline,
            default_debate,
            moderator: config.workflow.debate_moderator.trim().to_string(),
            root: config.paths.root.clone(),
            templates_dir: config.paths.templates_path(),
            prompts_dir: config.paths.prompts_path(),
            workspaces: config.workspaces.clone(),
        }
    }

    pub fn role_ids(&self) -> &[String] {
        &self.role_ids
    }

    pub fn default_pipeline_roles(&self) -> Vec<String> {
        self.default_pipeline.clone()
    }

    /// Configured debate roles that exist in the catalog. If none survive, the
    /// first three non-moderator roles; if there are none of those either, the
    /// configured list as-is.
    pub fn default_debate_roles(&self) -> Vec<String> {
        let known: Vec<String> = self
            .default_debate
            .iter()
            .filter(|role| self.role_ids.contains(*role))
            .cloned()
            .collect();
        if !known.is_empty() {
            return known;
        }

        let fallback: Vec<String> = self
            .role_ids
            .iter()
            .filter(|role| **role != self.moderator)
            .take(FALLBACK_DEBATE_SIZE)
            .cloned()
            .collect();
        if !fallback.is_empty() {
            return fallback;
        }

        self.default_debate.clone()
    }

    pub fn debate_moderator(&self) -> &str {
        &self.moderator
    }

    /// Stage template for a pipeline role, trimmed
    pub fn stage_template(&self, role: &str) -> String {
        read_trimmed(&self.templates_dir.join(format!("{role}.md")))
    }

    pub fn role_prompt(&self, role: &str) -> String {
        read_trimmed(&self.prompts_dir.join(format!("{role}.md")))
    }

    pub fn system_prompt(&self) -> String {
        read_trimmed(&self.prompts_dir.join("orchestrator_system.md"))
    }

    /// Working directory for a role's agent runs.
    ///
    /// An existing project-root override wins; then the role's mapped workspace
    /// when role workspaces are enabled and the directory exists; else the root.
    pub fn workspace_dir(&self, role: &str) -> PathBuf {
        if let Some(dir) = self
            .workspaces
            .project_root_override
            .as_deref()
            .filter(|dir| dir.is_dir())
        {
            return dir.to_path_buf();
        }

        if self.workspaces.use_role_workspaces_if_present {
            if let Some(mapped) = self.workspaces.roles.get(role) {
                let dir = self.root.join(mapped);
                if dir.is_dir() {
                    return dir;
                }
            }
        }

        self.root.clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}
