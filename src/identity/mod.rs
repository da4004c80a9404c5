//! Client identity store.
//!
//! Guarantees a stable identifier per browser profile and mirrors it into the
//! server session at most once per tab session. The ephemeral store acts as the
//! "already synced" marker; the durable store keeps the identifier across tabs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::AppResult;
use crate::session_sync::{Route, SessionSyncClient};
use crate::store::{KeyValueStore, PARTICIPANT_ID_KEY, RENDERED_USER_ID_KEY, USER_ID_KEY};

/// Which identity the page provisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Platform user (`user/checkuser`).
    User,
    /// Experiment participant (`participant/check`).
    #[default]
    Participant,
}

impl IdentityKind {
    /// Configuration name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::Participant => "participant",
        }
    }

    /// Identity-check route for this kind.
    pub fn check_route(&self) -> Route {
        match self {
            IdentityKind::User => Route::CheckUser,
            IdentityKind::Participant => Route::CheckParticipant,
        }
    }

    /// Form field carrying the existing identifier on the check route.
    pub fn form_field(&self) -> &'static str {
        match self {
            IdentityKind::User => "user_uuid",
            IdentityKind::Participant => "participant_uuid",
        }
    }

    /// Key under which both stores hold the identifier.
    pub fn storage_key(&self) -> &'static str {
        match self {
            IdentityKind::User => USER_ID_KEY,
            IdentityKind::Participant => PARTICIPANT_ID_KEY,
        }
    }
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IdentityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(IdentityKind::User),
            "participant" => Ok(IdentityKind::Participant),
            _ => Err(format!("Unknown identity kind: {}", s)),
        }
    }
}

/// Result of [`ClientIdentity::ensure_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The tab session already holds an identity; no request was made.
    AlreadySynced(String),
    /// The server returned an identity that is now in both stores.
    Provisioned {
        /// Identifier returned by the server.
        id: String,
        /// The durable store held no identity before this call.
        first_visit: bool,
    },
}

impl IdentityOutcome {
    /// The identifier, however it was obtained.
    pub fn id(&self) -> &str {
        match self {
            IdentityOutcome::AlreadySynced(id) => id,
            IdentityOutcome::Provisioned { id, .. } => id,
        }
    }

    /// Whether this call provisioned a profile that had no identity.
    pub fn is_first_visit(&self) -> bool {
        matches!(
            self,
            IdentityOutcome::Provisioned {
                first_visit: true,
                ..
            }
        )
    }
}

/// Identity provisioning over a durable and an ephemeral store.
#[derive(Clone)]
pub struct ClientIdentity {
    durable: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
    client: SessionSyncClient,
}

impl ClientIdentity {
    /// Create the component over both stores.
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        ephemeral: Arc<dyn KeyValueStore>,
        client: SessionSyncClient,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            client,
        }
    }

    /// Make sure both stores hold the same non-empty identifier.
    ///
    /// Issues at most one identity-check call. On failure nothing is written,
    /// so the next page load tries again.
    pub async fn ensure_identity(&self, kind: IdentityKind) -> AppResult<IdentityOutcome> {
        let key = kind.storage_key();

        if let Some(id) = non_empty(self.ephemeral.get(key).await?) {
            debug!(kind = %kind, "Identity already synced for this session");
            return Ok(IdentityOutcome::AlreadySynced(id));
        }

        let existing = non_empty(self.durable.get(key).await?);
        let first_visit = existing.is_none();

        let id = self.client.check_identity(kind, existing.as_deref()).await?;

        if let Some(previous) = existing.as_deref().filter(|prev| *prev != id) {
            warn!(kind = %kind, previous = %previous, id = %id, "Server replaced stored identity");
        }

        self.durable.set(key, &id).await?;
        if let Err(e) = self.ephemeral.set(key, &id).await {
            // A failed call leaves the profile as it was
            let restored = match existing.as_deref() {
                Some(previous) => self.durable.set(key, previous).await,
                None => self.durable.remove(key).await,
            };
            if let Err(restore_error) = restored {
                error!(kind = %kind, error = %restore_error, "Failed to restore durable identity");
            }
            return Err(e.into());
        }

        info!(kind = %kind, id = %id, first_visit, "Identity provisioned");
        Ok(IdentityOutcome::Provisioned { id, first_visit })
    }

    /// Durable identifier, if one was ever assigned.
    pub async fn current(&self, kind: IdentityKind) -> AppResult<Option<String>> {
        Ok(non_empty(self.durable.get(kind.storage_key()).await?))
    }

    /// Server-rendered user id adopted by an earlier page, if any.
    pub async fn rendered_user_id(&self) -> AppResult<Option<String>> {
        Ok(non_empty(self.durable.get(RENDERED_USER_ID_KEY).await?))
    }

    /// Keep a server-rendered user id unless one was adopted before.
    ///
    /// The id lives under its own key and does not count as a provisioned
    /// identity. Returns `true` if the id was stored.
    pub async fn adopt_current_id(&self, current_id: Option<&str>) -> AppResult<bool> {
        let Some(current_id) = current_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(false);
        };

        if self.rendered_user_id().await?.is_some() {
            return Ok(false);
        }

        self.durable.set(RENDERED_USER_ID_KEY, current_id).await?;
        info!(id = %current_id, "Adopted server-rendered user id");
        Ok(true)
    }

    /// Mirror the durable identifier into the server session.
    ///
    /// A user without a provisioned identity falls back to the adopted
    /// server-rendered id. Returns `false` without a request when neither
    /// exists.
    pub async fn mirror_identity(&self, kind: IdentityKind) -> AppResult<bool> {
        let id = match (self.current(kind).await?, kind) {
            (Some(id), _) => Some(id),
            (None, IdentityKind::User) => self.rendered_user_id().await?,
            (None, IdentityKind::Participant) => None,
        };
        let Some(id) = id else {
            return Ok(false);
        };

        self.client
            .post_update(Route::UpdateSessionUser, "id", &id)
            .await?;
        debug!(kind = %kind, "Identity mirrored into session");
        Ok(true)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
