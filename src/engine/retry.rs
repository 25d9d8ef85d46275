//! Per-entry retry state machine and final task resolution
//!
//! Each chain entry runs attempt → validate → {accept, retry with feedback,
//! abandon}. The decisions here are pure functions of the attempt number and
//! the observed outcome so the dispatcher loop only has to follow them.

/// What to do after one agent attempt against a chain entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDecision {
    /// Exit 0 and no violations
    Accept,
    /// Rejected output with retries left: rerun with correction feedback
    RetryWithFeedback,
    /// Process failure, or rejected output with no retries left
    Abandon,
}

/// Bounded correction retries for malformed agent output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRetryPolicy {
    max_retries: u32,
}

impl FormatRetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Attempts per chain entry: the first run plus the correction retries
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `attempt` is 1-based within the chain entry
    pub fn decide(&self, attempt: u32, exit_code: i32, violations: &[String]) -> AttemptDecision {
        if exit_code != 0 {
            return AttemptDecision::Abandon;
        }
        if violations.is_empty() {
            return AttemptDecision::Accept;
        }
        if attempt < self.max_attempts() {
            AttemptDecision::RetryWithFeedback
        } else {
            AttemptDecision::Abandon
        }
    }
}

/// How one chain entry ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Accepted,
    Abandoned {
        /// Violations from the entry's last validated attempt, if any
        violations: Vec<String>,
        /// Exit code of the entry's last run
        exit_code: i32,
        stderr: String,
        /// Non-zero exit whose stderr matched a quota marker
        quota_exhausted: bool,
    },
}

impl EntryOutcome {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(
            self,
            EntryOutcome::Abandoned {
                quota_exhausted: true,
                ..
            }
        )
    }
}

/// Final disposition of a dispatched task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Complete,
    Defer,
    Fail { error: String, exit_code: i32 },
}

/// Resolve the task from the outcomes of every attempted chain entry, in order
pub fn resolve(outcomes: &[EntryOutcome], defer_enabled: bool) -> Resolution {
    let Some(last) = outcomes.last() else {
        return Resolution::Fail {
            error: "Internal error: task execution did not produce a result".to_string(),
            exit_code: 1,
        };
    };

    match last {
        EntryOutcome::Accepted => Resolution::Complete,
        EntryOutcome::Abandoned { .. }
            if defer_enabled && outcomes.iter().all(EntryOutcome::is_quota_exhausted) =>
        {
            Resolution::Defer
        }
        EntryOutcome::Abandoned {
            violations,
            exit_code,
            stderr,
            ..
        } => {
            let error = if !violations.is_empty() {
                format!("Output contract invalid: {}", violations.join("; "))
            } else if !stderr.trim().is_empty() {
                stderr.trim().to_string()
            } else {
                "Model execution failed".to_string()
            };
            Resolution::Fail {
                error,
                exit_code: if *exit_code != 0 { *exit_code } else { 1 },
            }
        }
    }
}
