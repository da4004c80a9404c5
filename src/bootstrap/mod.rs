//! Page-load orchestration.
//!
//! Runs the synchronization steps of a page load strictly in order:
//! identity first, then progress initialization, then completion of the
//! current experiment. A failed identity sync stops the sequence.

use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::AppResult;
use crate::identity::{ClientIdentity, IdentityKind, IdentityOutcome};
use crate::page::PageContext;
use crate::progress::{InitOutcome, MarkOutcome, ProgressTracker};
use crate::session_sync::SessionSyncClient;
use crate::store::KeyValueStore;

/// What a page load did.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLoadReport {
    /// Identity provisioning result.
    pub identity: IdentityOutcome,
    /// Server-rendered user id adopted into the durable store.
    pub adopted_current_id: bool,
    /// Progress initialization, on experiment pages.
    pub progress: Option<InitOutcome>,
    /// Completion of the current experiment, on end pages.
    pub completion: Option<MarkOutcome>,
    /// Failures of the steps after identity sync.
    pub errors: Vec<String>,
}

/// Components of one tab, wired over shared stores and one client.
#[derive(Clone)]
pub struct PageLoader {
    identity: ClientIdentity,
    progress: ProgressTracker,
    kind: IdentityKind,
}

impl PageLoader {
    /// Wire the components of one tab.
    pub fn new(
        config: &Config,
        durable: Arc<dyn KeyValueStore>,
        ephemeral: Arc<dyn KeyValueStore>,
        client: SessionSyncClient,
    ) -> Self {
        let identity = ClientIdentity::new(durable.clone(), ephemeral, client.clone());
        let progress = ProgressTracker::new(durable, client, config.sync.progress_policy);
        Self {
            identity,
            progress,
            kind: config.sync.identity_kind,
        }
    }

    /// Identity component.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Progress component.
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Identity provisioned on page load.
    pub fn identity_kind(&self) -> IdentityKind {
        self.kind
    }

    /// Run every synchronization step for `page`.
    pub async fn on_page_load(&self, page: &PageContext) -> AppResult<PageLoadReport> {
        let mut errors = Vec::new();

        let adopted_current_id = match self
            .identity
            .adopt_current_id(page.current_id.as_deref())
            .await
        {
            Ok(adopted) => adopted,
            Err(e) => {
                error!(error = %e, "Failed to adopt server-rendered id");
                errors.push(e.to_string());
                false
            }
        };

        let identity = self.identity.ensure_identity(self.kind).await.map_err(|e| {
            error!(kind = %self.kind, error = %e, "Identity sync failed, retrying on next page load");
            e
        })?;

        let progress = if page.is_experiment_page() {
            match self
                .progress
                .initialize_progress(&page.expes, &identity)
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(error = %e, "Progress initialization failed");
                    errors.push(e.to_string());
                    None
                }
            }
        } else {
            None
        };

        let completion = match (page.end_expe, page.expe_name.as_deref()) {
            (true, Some(name)) => match self.progress.mark_done(name).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(experiment = %name, error = %e, "Failed to mark experiment done");
                    errors.push(e.to_string());
                    None
                }
            },
            _ => None,
        };

        info!(
            id = %identity.id(),
            progress = ?progress,
            completion = ?completion,
            errors = errors.len(),
            "Page load synchronized"
        );

        Ok(PageLoadReport {
            identity,
            adopted_current_id,
            progress,
            completion,
            errors,
        })
    }
}
