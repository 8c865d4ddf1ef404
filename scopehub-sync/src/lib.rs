//! # scopehub-sync
//!
//! Blocking synchronization layer: puller variants, the [`ScopeStore`] that
//! owns every scope's clone, and push-webhook validation.
//!
//! Call [`ScopeStore::poll_scope`] to bring one scope up to date, or
//! [`plan_webhook`] to turn an inbound push into the scopes it affects.

pub mod error;
pub mod puller;
pub mod scope_store;
pub mod webhook;

pub use error::{SyncError, WebhookError};
pub use puller::{GitPuller, PullerOptions, ScopePuller, SourceKind, DEFAULT_FETCH_TIMEOUT};
pub use scope_store::ScopeStore;
pub use webhook::{
    plan_webhook, sign_payload, verify_signature, PushEvent, WebhookPlan, WebhookTarget,
    EVENT_HEADER, SIGNATURE_HEADER,
};
