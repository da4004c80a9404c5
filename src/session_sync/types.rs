use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

use crate::error::{SyncError, SyncResult};

/// Server routes recognized by the session sync client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Obtain or confirm a user identity.
    CheckUser,
    /// Obtain or confirm a participant identity.
    CheckParticipant,
    /// Mirror a `key=<k>&value=<v>` pair into the server session.
    UpdateSessionUser,
    /// Mirror the identity into the session (`value=<id>`).
    UpdateSessionUserId,
    /// Mirror experiment progress or answer timing into the session.
    UpdateSessionUserExpes,
    /// Per-session-label counts for an experiment.
    ExperimentStat,
}

impl Route {
    /// Path relative to the server root, without a leading slash.
    pub fn path(&self) -> &'static str {
        match self {
            Route::CheckUser => "user/checkuser",
            Route::CheckParticipant => "participant/check",
            Route::UpdateSessionUser => "update_session_user",
            Route::UpdateSessionUserId => "update_session_user_id",
            Route::UpdateSessionUserExpes => "update_session_user_expes",
            Route::ExperimentStat => "experiments/experiment/stat",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// One record of an identity-check response.
///
/// The server serializes model instances, so the identifier lives in `pk`
/// and may be either a string (UUID) or an integer.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRecord {
    /// Primary key: the identifier.
    pub pk: serde_json::Value,
    /// Remaining model fields, unused.
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
}

/// Extract the identifier from an identity-check response body.
pub fn parse_identity_response(route: Route, body: &str) -> SyncResult<String> {
    let malformed = |message: String| SyncError::MalformedResponse {
        route: route.path().to_string(),
        message,
    };

    let records: Vec<IdentityRecord> = serde_json::from_str(body)
        .map_err(|e| malformed(format!("expected a JSON array of records: {}", e)))?;

    let first = records
        .first()
        .ok_or_else(|| malformed("empty record array".to_string()))?;

    let id = match &first.pk {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => return Err(malformed(format!("unsupported pk value: {}", other))),
    };

    if id.is_empty() {
        return Err(malformed("empty pk".to_string()));
    }

    Ok(id)
}

/// Count (and optional display color) for one session label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEntry {
    /// Sessions recorded under this label.
    pub count: u64,
    /// Display color chosen by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Statistics payload of the experiment stat route: label → entry, in the
/// order the server sent them.
pub type ExperimentStats = IndexMap<String, StatEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_paths() {
        assert_eq!(Route::CheckUser.path(), "user/checkuser");
        assert_eq!(Route::CheckParticipant.path(), "participant/check");
        assert_eq!(Route::UpdateSessionUserExpes.to_string(), "update_session_user_expes");
        assert_eq!(Route::ExperimentStat.path(), "experiments/experiment/stat");
    }

    #[test]
    fn test_parse_identity_string_pk() {
        let id = parse_identity_response(Route::CheckUser, r#"[{"pk": "abc123"}]"#).unwrap();
        assert_eq!(id, "abc123");
    }

    #[test]
    fn test_parse_identity_numeric_pk() {
        let body = r#"[{"model": "main.participant", "pk": 42, "fields": {}}]"#;
        let id = parse_identity_response(Route::CheckParticipant, body).unwrap();
        assert_eq!(id, "42");
    }

    #[test]
    fn test_parse_identity_uses_first_record() {
        let body = r#"[{"pk": "first"}, {"pk": "second"}]"#;
        assert_eq!(
            parse_identity_response(Route::CheckUser, body).unwrap(),
            "first"
        );
    }

    #[test]
    fn test_parse_identity_malformed_bodies() {
        for body in [
            "",
            "not json",
            "{}",
            "[]",
            r#"[{"id": "x"}]"#,
            r#"[{"pk": ""}]"#,
            r#"[{"pk": null}]"#,
            r#"[{"pk": ["a"]}]"#,
        ] {
            let err = parse_identity_response(Route::CheckUser, body).unwrap_err();
            assert!(
                matches!(err, SyncError::MalformedResponse { .. }),
                "body {:?} should be malformed, got {:?}",
                body,
                err
            );
        }
    }

    #[test]
    fn test_stat_entry_optional_color() {
        let stats: ExperimentStats =
            serde_json::from_str(r##"{"A": {"count": 3}, "B": {"count": 1, "color": "#ff0000"}}"##)
                .unwrap();
        assert_eq!(stats["A"].color, None);
        assert_eq!(stats["B"].color.as_deref(), Some("#ff0000"));
        assert_eq!(stats["A"].count, 3);
    }

    #[test]
    fn test_stats_keep_server_order() {
        let stats: ExperimentStats =
            serde_json::from_str(r#"{"running": {"count": 1}, "finished": {"count": 3}}"#)
                .unwrap();
        let labels: Vec<&str> = stats.keys().map(String::as_str).collect();
        assert_eq!(labels, vec!["running", "finished"]);
    }
}
