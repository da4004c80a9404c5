//! # Experiment Session Client
//!
//! Client-side state synchronization for a behavioral experiment web platform.
//! A browser profile keeps a stable participant/user identity and a per-experiment
//! progress record; both are mirrored into the server-held session.
//!
//! ## Features
//!
//! - **Identity**: provisioned once per profile, synced once per tab session
//! - **Progress**: `experiment → {done}` record, mirrored on every change
//! - **Capture**: reaction-time answers from arrow keys or buttons, with a
//!   first-answer latch per page
//! - **Statistics**: chart model for per-experiment session counts
//!
//! ## Architecture
//!
//! ```text
//! Page load → PageLoader ─┬─ ClientIdentity ──┐
//!                         └─ ProgressTracker ─┴─ SessionSyncClient → server (form POST)
//!                                   ↓
//!                     durable store (SQLite) / per-tab store (memory)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use expe_session_client::{Config, PageContext, PageLoader};
//! use expe_session_client::session_sync::SessionSyncClient;
//! use expe_session_client::store::{MemoryStore, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let durable = SqliteStore::new(&config.store).await?;
//!     let client = SessionSyncClient::new(&config.server, config.request.clone())?;
//!     let loader = PageLoader::new(&config, Arc::new(durable), Arc::new(MemoryStore::new()), client);
//!     let page = PageContext::new("/expe?expe=quest").with_expe_name("quest");
//!     let report = loader.on_page_load(&page).await?;
//!     println!("identity: {}", report.identity.id());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Page-load orchestration.
pub mod bootstrap;
/// Stimulus/response capture.
pub mod capture;
/// CLI commands for the `expe-session` binary.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Client identity provisioning.
pub mod identity;
/// Page context replacing page-injected globals.
pub mod page;
/// Experiment progress tracking.
pub mod progress;
/// HTTP transport to the server session.
pub mod session_sync;
/// Experiment statistics chart model.
pub mod stats;
/// Durable and per-tab key/value stores.
pub mod store;

pub use bootstrap::{PageLoadReport, PageLoader};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use page::PageContext;
