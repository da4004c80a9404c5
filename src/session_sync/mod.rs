//! HTTP transport mirroring client state into the server-held session.
//!
//! Every call is a form-encoded POST to a fixed route, carrying the page's
//! CSRF token.

mod client;
mod types;

pub use client::{SessionSyncClient, CSRF_HEADER};
pub use types::{parse_identity_response, ExperimentStats, IdentityRecord, Route, StatEntry};
