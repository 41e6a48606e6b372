//! Automation catalog — the process-wide set of enabled automations.
//!
//! The set is published through a [`watch`] channel as an immutable
//! `Arc<Vec<Automation>>`. Readers take a snapshot per event or sweep;
//! writers replace the whole set after every automation change.

use std::sync::Arc;

use tokio::sync::watch;

use crmflow_domain::automation::Automation;
use crmflow_domain::error::CrmFlowError;

use crate::ports::AutomationRepository;

/// Snapshot type handed to readers.
pub type CatalogSnapshot = Arc<Vec<Automation>>;

#[derive(Debug)]
pub struct AutomationCatalog {
    sender: watch::Sender<CatalogSnapshot>,
}

impl Default for AutomationCatalog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AutomationCatalog {
    #[must_use]
    pub fn new(enabled: Vec<Automation>) -> Self {
        let (sender, _) = watch::channel(Arc::new(enabled));
        Self { sender }
    }

    /// The current set of enabled automations.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        Arc::clone(&self.sender.borrow())
    }

    /// Be told whenever the set is replaced.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CatalogSnapshot> {
        self.sender.subscribe()
    }

    /// Swap in a new set.
    pub fn replace(&self, enabled: Vec<Automation>) {
        let count = enabled.len();
        self.sender.send_replace(Arc::new(enabled));
        tracing::debug!(count, "automation catalog replaced");
    }

    /// Rebuild the set from storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository; the previous
    /// set stays in place.
    pub async fn refresh<R: AutomationRepository>(&self, repo: &R) -> Result<(), CrmFlowError> {
        let enabled = repo.get_enabled().await?;
        self.replace(enabled);
        Ok(())
    }
}
