//! Shared identifier and scoping types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one task execution.
pub type ExecutionId = String;

/// Generate a prefixed unique identifier, e.g. `exec_6f1c...`.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Opaque scoping tags attached to executions and cost entries.
///
/// These are not authenticated identities; they only partition records for
/// filtering and budget scoping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Organization the work is attributed to.
    pub organization: Option<String>,
    /// User the work is attributed to.
    pub user: Option<String>,
}

impl Scope {
    /// Scope with no tags.
    pub fn global() -> Self {
        Self::default()
    }

    /// Scope bound to an organization.
    pub fn organization(org: impl Into<String>) -> Self {
        Self {
            organization: Some(org.into()),
            user: None,
        }
    }

    /// Attach a user tag.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Filter applied to execution listings and metrics.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFilter {
    /// Task class to match.
    pub task_class: Option<String>,
    /// Organization to match.
    pub organization: Option<String>,
    /// User to match.
    pub user: Option<String>,
}

impl ExecutionFilter {
    /// Filter matching a single task class.
    pub fn task_class(task_class: impl Into<String>) -> Self {
        Self {
            task_class: Some(task_class.into()),
            ..Self::default()
        }
    }

    /// Filter matching a single organization.
    pub fn organization(org: impl Into<String>) -> Self {
        Self {
            organization: Some(org.into()),
            ..Self::default()
        }
    }

    /// Whether a record with these attributes passes the filter.
    pub fn matches(&self, task_class: &str, scope: &Scope) -> bool {
        if let Some(class) = &self.task_class {
            if class != task_class {
                return false;
            }
        }
        if let Some(org) = &self.organization {
            if scope.organization.as_deref() != Some(org.as_str()) {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if scope.user.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        true
    }
}
