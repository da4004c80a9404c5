//! Experiment progress tracking.
//!
//! The durable store owns a JSON mapping `experiment name → {"done": bool}`;
//! every change is mirrored verbatim to the server session.
//!
//! Initialization needs an [`IdentityOutcome`], so progress can only be
//! written after identity provisioning has completed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::identity::IdentityOutcome;
use crate::session_sync::{Route, SessionSyncClient};
use crate::store::{read_json, write_json, KeyValueStore, Stored, PROGRESS_KEY};

/// Completion state of one experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentState {
    /// The experiment reached its end page.
    pub done: bool,
}

/// Experiment name → completion state.
pub type ProgressRecord = BTreeMap<String, ExperimentState>;

/// Build a fresh record with every experiment not done.
pub fn build_record<S: AsRef<str>>(names: &[S]) -> ProgressRecord {
    names
        .iter()
        .map(|name| (name.as_ref().to_string(), ExperimentState::default()))
        .collect()
}

/// When the progress record is (re)initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPolicy {
    /// Only when the identity was provisioned on a first visit.
    #[default]
    FirstVisitOnly,
    /// On every page load; experiments missing from the record are added
    /// and existing entries are kept.
    MergeMissing,
}

impl std::fmt::Display for ProgressPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressPolicy::FirstVisitOnly => write!(f, "first_visit_only"),
            ProgressPolicy::MergeMissing => write!(f, "merge_missing"),
        }
    }
}

impl std::str::FromStr for ProgressPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "first_visit_only" => Ok(ProgressPolicy::FirstVisitOnly),
            "merge_missing" => Ok(ProgressPolicy::MergeMissing),
            _ => Err(format!("Unknown progress policy: {}", s)),
        }
    }
}

/// Result of [`ProgressTracker::initialize_progress`].
#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    /// A fresh record was written and mirrored.
    Initialized(ProgressRecord),
    /// Missing experiments were added to the stored record and mirrored.
    Merged {
        /// Experiments added, in input order.
        added: Vec<String>,
    },
    /// The stored record already covers every experiment.
    Unchanged,
    /// Nothing was done.
    Skipped(InitSkip),
}

/// Why initialization did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSkip {
    /// The page lists no experiments.
    NoExperiments,
    /// First-visit-only policy and the profile already had an identity.
    ReturningVisitor,
}

/// Result of [`ProgressTracker::mark_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The record now has `done = true` and was mirrored.
    Marked {
        /// The entry was already done before this call.
        already_done: bool,
    },
    /// Defensive no-op.
    Skipped(MarkSkip),
}

/// Why marking did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkSkip {
    /// No progress record is stored.
    NoRecord,
    /// The stored record is not valid JSON of the expected shape.
    MalformedRecord,
    /// The record has no entry for the experiment.
    UnknownExperiment,
}

/// Client-local progress record mirrored into the server session.
#[derive(Clone)]
pub struct ProgressTracker {
    durable: Arc<dyn KeyValueStore>,
    client: SessionSyncClient,
    policy: ProgressPolicy,
}

impl ProgressTracker {
    /// Create a tracker over the durable store.
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        client: SessionSyncClient,
        policy: ProgressPolicy,
    ) -> Self {
        Self {
            durable,
            client,
            policy,
        }
    }

    /// Initialization policy in effect.
    pub fn policy(&self) -> ProgressPolicy {
        self.policy
    }

    /// Read the stored record.
    pub async fn load(&self) -> AppResult<Stored<ProgressRecord>> {
        Ok(read_json(self.durable.as_ref(), PROGRESS_KEY).await?)
    }

    /// Create (or extend) the progress record for the known experiments.
    pub async fn initialize_progress<S: AsRef<str>>(
        &self,
        names: &[S],
        identity: &IdentityOutcome,
    ) -> AppResult<InitOutcome> {
        if names.is_empty() {
            return Ok(InitOutcome::Skipped(InitSkip::NoExperiments));
        }

        match self.policy {
            ProgressPolicy::FirstVisitOnly => {
                if !identity.is_first_visit() {
                    debug!(id = %identity.id(), "Returning visitor, progress left as is");
                    return Ok(InitOutcome::Skipped(InitSkip::ReturningVisitor));
                }
                let record = build_record(names);
                self.save_and_mirror(&record).await?;
                info!(experiments = record.len(), "Progress initialized");
                Ok(InitOutcome::Initialized(record))
            }
            ProgressPolicy::MergeMissing => match self.load().await? {
                Stored::Present(mut record) => {
                    let added: Vec<String> = names
                        .iter()
                        .map(|name| name.as_ref().to_string())
                        .filter(|name| !record.contains_key(name))
                        .collect();

                    if added.is_empty() {
                        return Ok(InitOutcome::Unchanged);
                    }

                    for name in &added {
                        record.insert(name.clone(), ExperimentState::default());
                    }
                    self.save_and_mirror(&record).await?;
                    info!(added = ?added, "Progress extended with new experiments");
                    Ok(InitOutcome::Merged { added })
                }
                stored => {
                    if let Stored::Malformed { reason, .. } = &stored {
                        warn!(reason = %reason, "Replacing malformed progress record");
                    }
                    let record = build_record(names);
                    self.save_and_mirror(&record).await?;
                    info!(experiments = record.len(), "Progress initialized");
                    Ok(InitOutcome::Initialized(record))
                }
            },
        }
    }

    /// Record that `name` has ended.
    pub async fn mark_done(&self, name: &str) -> AppResult<MarkOutcome> {
        let mut record = match self.load().await? {
            Stored::Present(record) => record,
            Stored::Absent => {
                debug!(experiment = %name, "No progress record, nothing to mark");
                return Ok(MarkOutcome::Skipped(MarkSkip::NoRecord));
            }
            Stored::Malformed { reason, .. } => {
                warn!(experiment = %name, reason = %reason, "Progress record is malformed");
                return Ok(MarkOutcome::Skipped(MarkSkip::MalformedRecord));
            }
        };

        let Some(state) = record.get_mut(name) else {
            warn!(experiment = %name, "Experiment not in progress record");
            return Ok(MarkOutcome::Skipped(MarkSkip::UnknownExperiment));
        };

        let already_done = state.done;
        state.done = true;

        self.save_and_mirror(&record).await?;
        info!(experiment = %name, already_done, "Experiment marked done");
        Ok(MarkOutcome::Marked { already_done })
    }

    async fn save_and_mirror(&self, record: &ProgressRecord) -> AppResult<()> {
        let serialized = write_json(self.durable.as_ref(), PROGRESS_KEY, record).await?;
        self.client
            .post_value(Route::UpdateSessionUserExpes, &serialized)
            .await?;
        Ok(())
    }
}
