//! A session that paces like the real one but submits nothing.
//!
//! Every prompt is reported as a success without an artifact id, the same
//! shape a real session produces when `auto_submit` is off.

use async_trait::async_trait;
use tunefleet_core::pacing::PacingPolicy;
use tunefleet_core::prompt::Prompt;

use crate::options::GenerationOptions;
use crate::session::{AutomationSession, ItemResult, SessionError, SessionFactory};

pub struct DryRunSession {
    account_ref: String,
    pacing: PacingPolicy,
    submitted: usize,
}

impl DryRunSession {
    pub fn new(account_ref: impl Into<String>, pacing: PacingPolicy) -> Self {
        Self {
            account_ref: account_ref.into(),
            pacing,
            submitted: 0,
        }
    }

    /// Prompts handled so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }
}

#[async_trait]
impl AutomationSession for DryRunSession {
    async fn submit_batch(
        &mut self,
        prompts: &[Prompt],
        _options: &GenerationOptions,
    ) -> Result<Vec<ItemResult>, SessionError> {
        let mut results = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing.item_delay()).await;
            }
            tokio::time::sleep(self.pacing.submit_delay()).await;
            tracing::info!(
                account = %self.account_ref,
                title = prompt.display_title(),
                style = %prompt.style,
                "Dry run: prompt accepted"
            );
            self.submitted += 1;
            results.push(ItemResult::Success { artifact_ref: None });
        }
        Ok(results)
    }

    async fn close(&mut self) {
        tracing::debug!(account = %self.account_ref, submitted = self.submitted, "Dry-run session closed");
    }
}

/// Opens a [`DryRunSession`] for any account.
#[derive(Debug, Clone, Default)]
pub struct DryRunFactory {
    pacing: PacingPolicy,
}

impl DryRunFactory {
    pub fn new(pacing: PacingPolicy) -> Self {
        Self { pacing }
    }
}

#[async_trait]
impl SessionFactory for DryRunFactory {
    async fn open(&self, account_ref: &str) -> Result<Box<dyn AutomationSession>, SessionError> {
        Ok(Box::new(DryRunSession::new(account_ref, self.pacing)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn paces_between_items() {
        let pacing = PacingPolicy {
            item_delay_min: Duration::from_secs(3),
            item_delay_max: Duration::from_secs(3),
            submit_delay_min: Duration::from_secs(2),
            submit_delay_max: Duration::from_secs(2),
        };
        let mut session = DryRunSession::new("a", pacing);
        let prompts = vec![Prompt::new("rock"), Prompt::new("jazz"), Prompt::new("folk")];

        let start = tokio::time::Instant::now();
        let results = session
            .submit_batch(&prompts, &GenerationOptions::default())
            .await
            .unwrap();

        // 3 submit delays + 2 inter-item delays.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(ItemResult::is_success));
        assert_eq!(session.submitted(), 3);
    }

    #[tokio::test]
    async fn factory_opens_for_any_account() {
        let factory = DryRunFactory::new(PacingPolicy::immediate());
        let mut session = factory.open("anyone").await.unwrap();
        let results = session
            .submit_batch(&[Prompt::new("x")], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(results, vec![ItemResult::Success { artifact_ref: None }]);
        session.close().await;
    }
}
