//! Model routing and quota classification

use crate::config::{QuotaSection, RouterSection};
use crate::state::ModelChainEntry;

/// Resolves per-role fallback chains and classifies quota failures
#[derive(Debug, Clone)]
pub struct ModelRouter {
    router: RouterSection,
    quota: QuotaSection,
}

impl ModelRouter {
    pub fn new(router: RouterSection, quota: QuotaSection) -> Self {
        Self { router, quota }
    }

    /// The role's chain (or the default chain), normalised and capped at
    /// `max_model_attempts_per_task`. Never empty.
    pub fn chain_for_role(&self, role: &str) -> Vec<ModelChainEntry> {
        let configured = self
            .router
            .roles
            .get(role)
            .filter(|chain| !chain.is_empty())
            .unwrap_or(&self.router.default_chain);

        let mut chain: Vec<ModelChainEntry> =
            configured.iter().map(ModelChainEntry::normalized).collect();
        if chain.is_empty() {
            chain.push(ModelChainEntry::codex_default());
        }
        chain.truncate(self.max_attempts());
        chain
    }

    pub fn max_attempts(&self) -> usize {
        self.router.max_model_attempts_per_task.max(1) as usize
    }

    /// Case-insensitive substring match against the configured markers
    pub fn is_quota_error(&self, stderr: &str) -> bool {
        let lowered = stderr.to_lowercase();
        self.quota
            .quota_error_markers
            .iter()
            .map(|marker| marker.trim().to_lowercase())
            .any(|marker| !marker.is_empty() && lowered.contains(&marker))
    }

    pub fn defer_enabled(&self) -> bool {
        self.quota.defer_on_exhausted_models
    }

    /// Deferral window in minutes, at least one
    pub fn defer_minutes(&self) -> i64 {
        self.quota.defer_minutes_on_exhausted_models.max(1)
    }
}
