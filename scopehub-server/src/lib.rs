//! # scopehub-server
//!
//! Async HTTP service over the blocking [`scopehub_sync::ScopeStore`]: admin
//! and consumer routes, the periodic sweep, push-webhook ingestion and
//! per-scope change notifications.

pub mod auth;
pub mod config;
pub mod error;
pub mod notifier;
pub mod pubsub;
pub mod routes;
pub mod runtime;
pub mod state;
pub mod triggers;

pub use config::{EnvConfig, FileConfig, LogFormat, ServerConfig};
pub use error::{ApiError, ServerError};
pub use notifier::ChangeNotifier;
pub use pubsub::{policy_topic, BroadcastHub, Notification, TopicPublisher};
pub use routes::build_router;
pub use runtime::{build_state, run, seed_scopes, start_blocking};
pub use state::{ApiSettings, AppState};
pub use triggers::{handle_push_webhook, run_sweep, SweepReport, WebhookReport};
