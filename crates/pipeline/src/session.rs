//! The automation-session capability consumed by the batch engine.
//!
//! A session is one authenticated, browser-driven context for one account.
//! It is not shareable: the engine holds it by `&mut` for the lifetime of
//! one entry and closes it afterwards.

use async_trait::async_trait;
use tunefleet_core::prompt::Prompt;

use crate::options::GenerationOptions;

/// Per-prompt outcome reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    /// Submitted. `artifact_ref` is the created artifact's id, or `None`
    /// when the form was left for manual submission.
    Success { artifact_ref: Option<String> },
    Failure { reason: String },
}

impl ItemResult {
    pub fn success(artifact_ref: impl Into<String>) -> Self {
        Self::Success {
            artifact_ref: Some(artifact_ref.into()),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Session-level failure, distinct from a single item failing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Automation session unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AutomationSession: Send {
    /// Submit `prompts` in order and report one result per prompt.
    ///
    /// Implementations apply their own human-like pacing between items. An
    /// `Err` means the session itself is gone; results for the batch are
    /// then unknown.
    async fn submit_batch(
        &mut self,
        prompts: &[Prompt],
        options: &GenerationOptions,
    ) -> Result<Vec<ItemResult>, SessionError>;

    /// Release the underlying browser context.
    async fn close(&mut self) {}
}

/// Opens a session bound to one account.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, account_ref: &str) -> Result<Box<dyn AutomationSession>, SessionError>;
}
