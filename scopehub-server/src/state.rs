//! Shared handler state.

use std::sync::Arc;
use std::time::Duration;

use scopehub_core::{Scope, ScopeId};
use scopehub_sync::{ScopeStore, SyncError};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::notifier::ChangeNotifier;
use crate::pubsub::{BroadcastHub, TopicPublisher};

/// Secrets and limits the HTTP layer needs.
#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    pub scope_api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub publish_timeout: Duration,
}

impl ApiSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            scope_api_key: config.scope_api_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            publish_timeout: config.publish_timeout,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ScopeStore>,
    pub hub: Arc<BroadcastHub>,
    pub notifier: ChangeNotifier,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    /// State whose notifications go to a fresh in-process hub.
    pub fn new(store: Arc<ScopeStore>, settings: ApiSettings) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let publisher: Arc<dyn TopicPublisher> = hub.clone();
        Self::with_publisher(store, hub, publisher, settings)
    }

    /// State publishing through `publisher` while subscribers attach to `hub`.
    pub fn with_publisher(
        store: Arc<ScopeStore>,
        hub: Arc<BroadcastHub>,
        publisher: Arc<dyn TopicPublisher>,
        settings: ApiSettings,
    ) -> Self {
        let notifier = ChangeNotifier::new(store.clone(), publisher, settings.publish_timeout);
        Self {
            store,
            hub,
            notifier,
            settings: Arc::new(settings),
        }
    }

    pub async fn get_scope(&self, scope_id: ScopeId) -> Result<Scope, ServerError> {
        let store = self.store.clone();
        blocking(move || store.get_scope(&scope_id)).await
    }

    pub async fn all_scopes(&self) -> Result<Vec<Scope>, ServerError> {
        let store = self.store.clone();
        blocking(move || store.all_scopes()).await
    }
}

/// Run blocking store work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ServerError>
where
    F: FnOnce() -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ServerError::Join(format!("blocking task join error: {err}")))?
        .map_err(ServerError::from)
}
