//! Integration tests for identity provisioning
//!
//! Both stores are in memory; the server is a wiremock instance.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wiremock::{
    matchers::{body_string, method, path},
    Mock, MockServer, ResponseTemplate,
};

use expe_session_client::config::{RequestConfig, ServerConfig};
use expe_session_client::error::{StoreError, StoreResult};
use expe_session_client::identity::{ClientIdentity, IdentityKind, IdentityOutcome};
use expe_session_client::session_sync::SessionSyncClient;
use expe_session_client::store::{KeyValueStore, MemoryStore, RENDERED_USER_ID_KEY, USER_ID_KEY};

struct Tab {
    durable: Arc<MemoryStore>,
    ephemeral: Arc<MemoryStore>,
    identity: ClientIdentity,
}

/// Create a tab over fresh stores pointing to the mock server
fn create_tab(base_url: &str) -> Tab {
    create_tab_with_durable(base_url, Arc::new(MemoryStore::new()))
}

fn create_client(base_url: &str) -> SessionSyncClient {
    SessionSyncClient::new(
        &ServerConfig {
            base_url: base_url.to_string(),
            csrf_token: "test-csrf-token".to_string(),
        },
        RequestConfig {
            timeout_ms: 5000,
            max_retries: 0,
            retry_delay_ms: 10,
        },
    )
    .expect("Failed to create client")
}

fn create_tab_with_durable(base_url: &str, durable: Arc<MemoryStore>) -> Tab {
    let ephemeral = Arc::new(MemoryStore::new());
    let identity = ClientIdentity::new(durable.clone(), ephemeral.clone(), create_client(base_url));

    Tab {
        durable,
        ephemeral,
        identity,
    }
}

/// Session store that can be read but rejects every write
struct ReadOnlyStore;

#[async_trait]
impl KeyValueStore for ReadOnlyStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Query {
            message: format!("quota exceeded writing {}", key),
        })
    }

    async fn remove(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_first_visit_provisions_both_stores() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/user/checkuser"))
        .and(body_string("user_uuid="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"pk": "abc123"}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tab = create_tab(&mock_server.uri());
    let outcome = tab.identity.ensure_identity(IdentityKind::User).await.unwrap();

    assert_eq!(
        outcome,
        IdentityOutcome::Provisioned {
            id: "abc123".to_string(),
            first_visit: true,
        }
    );
    assert_eq!(
        tab.durable.get(USER_ID_KEY).await.unwrap().as_deref(),
        Some("abc123")
    );
    assert_eq!(
        tab.ephemeral.get(USER_ID_KEY).await.unwrap().as_deref(),
        Some("abc123")
    );
}

#[tokio::test]
async fn test_synced_session_makes_no_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"pk": "other"}])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let tab = create_tab(&mock_server.uri());
    tab.ephemeral.set(USER_ID_KEY, "abc123").await.unwrap();

    let outcome = tab.identity.ensure_identity(IdentityKind::User).await.unwrap();
    assert_eq!(outcome, IdentityOutcome::AlreadySynced("abc123".to_string()));
}

#[tokio::test]
async fn test_second_call_in_same_session_is_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/participant/check"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"pk": 9}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tab = create_tab(&mock_server.uri());
    let first = tab
        .identity
        .ensure_identity(IdentityKind::Participant)
        .await
        .unwrap();
    let second = tab
        .identity
        .ensure_identity(IdentityKind::Participant)
        .await
        .unwrap();

    assert_eq!(first.id(), "9");
    assert_eq!(second, IdentityOutcome::AlreadySynced("9".to_string()));
}

#[tokio::test]
async fn test_new_tab_confirms_durable_identity() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/user/checkuser"))
        .and(body_string("user_uuid=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"pk": "abc123"}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let durable = Arc::new(MemoryStore::new());
    durable.set(USER_ID_KEY, "abc123").await.unwrap();

    let tab = create_tab_with_durable(&mock_server.uri(), durable);
    let outcome = tab.identity.ensure_identity(IdentityKind::User).await.unwrap();

    assert_eq!(
        outcome,
        IdentityOutcome::Provisioned {
            id: "abc123".to_string(),
            first_visit: false,
        }
    );
}

#[tokio::test]
async fn test_failed_check_leaves_stores_unset() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/user/checkuser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tab = create_tab(&mock_server.uri());
    let result = tab.identity.ensure_identity(IdentityKind::User).await;

    assert!(result.is_err());
    assert_eq!(tab.durable.get(USER_ID_KEY).await.unwrap(), None);
    assert_eq!(tab.ephemeral.get(USER_ID_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_session_write_failure_restores_profile() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/user/checkuser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"pk": "abc123"}])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let durable = Arc::new(MemoryStore::new());
    let identity = ClientIdentity::new(
        durable.clone(),
        Arc::new(ReadOnlyStore),
        create_client(&mock_server.uri()),
    );

    let result = identity.ensure_identity(IdentityKind::User).await;
    assert!(result.is_err());
    assert_eq!(durable.get(USER_ID_KEY).await.unwrap(), None);

    // A later page load with a working session store is still a first visit
    let tab = create_tab_with_durable(&mock_server.uri(), durable);
    let outcome = tab.identity.ensure_identity(IdentityKind::User).await.unwrap();
    assert!(outcome.is_first_visit());
}

#[tokio::test]
async fn test_adopt_current_id_only_when_absent() {
    let tab = create_tab("http://127.0.0.1:1");

    assert!(!tab.identity.adopt_current_id(None).await.unwrap());
    assert!(!tab.identity.adopt_current_id(Some("  ")).await.unwrap());
    assert!(tab.identity.adopt_current_id(Some("srv-1")).await.unwrap());
    assert!(!tab.identity.adopt_current_id(Some("srv-2")).await.unwrap());

    assert_eq!(
        tab.identity.rendered_user_id().await.unwrap().as_deref(),
        Some("srv-1")
    );
    // The provisioned user identity stays untouched
    assert_eq!(tab.identity.current(IdentityKind::User).await.unwrap(), None);
}

#[tokio::test]
async fn test_mirror_identity() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/update_session_user"))
        .and(body_string("key=id&value=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("session update done"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tab = create_tab(&mock_server.uri());
    assert!(!tab.identity.mirror_identity(IdentityKind::User).await.unwrap());

    tab.durable.set(USER_ID_KEY, "abc123").await.unwrap();
    assert!(tab.identity.mirror_identity(IdentityKind::User).await.unwrap());
}

#[tokio::test]
async fn test_mirror_identity_falls_back_to_rendered_user_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/update_session_user"))
        .and(body_string("key=id&value=srv-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let tab = create_tab(&mock_server.uri());
    tab.durable.set(RENDERED_USER_ID_KEY, "srv-1").await.unwrap();

    assert!(!tab
        .identity
        .mirror_identity(IdentityKind::Participant)
        .await
        .unwrap());
    assert!(tab.identity.mirror_identity(IdentityKind::User).await.unwrap());
}
