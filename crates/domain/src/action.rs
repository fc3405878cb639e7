//! Action — a modeled long-running device operation.
//!
//! ```text
//! PENDING ──start──▶ IN_PROGRESS ──complete──▶ COMPLETED
//!    │                    │
//!    └───────fail─────────┴──────fail───────▶ FAILED
//! ```
//!
//! Terminal states stamp `completedAt`; `FAILED` also records an `error`.
//! Nothing leaves a terminal state.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Message recorded when an action is cancelled before completion.
pub const CANCELLED_MESSAGE: &str = "Action cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ActionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::InProgress => f.write_str("IN_PROGRESS"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move action from {from} to {to}")]
pub struct TransitionError {
    pub from: ActionStatus,
    pub to: ActionStatus,
}

/// One in-flight (or finished) device operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub name: String,
    pub status: ActionStatus,
    pub started_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    /// A freshly created, `PENDING` action.
    #[must_use]
    pub fn pending(name: impl Into<String>, started_at: Timestamp) -> Self {
        Self {
            name: name.into(),
            status: ActionStatus::Pending,
            started_at,
            completed_at: None,
            error: None,
        }
    }

    /// `PENDING` → `IN_PROGRESS`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from any other status.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(ActionStatus::InProgress, &[ActionStatus::Pending])
    }

    /// `IN_PROGRESS` → `COMPLETED`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from any other status.
    pub fn complete(&mut self, at: Timestamp) -> Result<(), TransitionError> {
        self.transition(ActionStatus::Completed, &[ActionStatus::InProgress])?;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Any non-terminal status → `FAILED`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the action already finished.
    pub fn fail(&mut self, at: Timestamp, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(
            ActionStatus::Failed,
            &[ActionStatus::Pending, ActionStatus::InProgress],
        )?;
        self.completed_at = Some(at);
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(
        &mut self,
        to: ActionStatus,
        allowed_from: &[ActionStatus],
    ) -> Result<(), TransitionError> {
        if !allowed_from.contains(&self.status) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
