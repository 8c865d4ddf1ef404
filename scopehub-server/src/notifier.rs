//! Change notifier: one notification per changed directory of a commit range.

use std::sync::Arc;
use std::time::Duration;

use scopehub_core::{CommitRange, ScopeId};
use scopehub_sync::ScopeStore;

use crate::error::ServerError;
use crate::pubsub::{Notification, TopicPublisher};
use crate::state::blocking;

#[derive(Clone)]
pub struct ChangeNotifier {
    store: Arc<ScopeStore>,
    publisher: Arc<dyn TopicPublisher>,
    publish_timeout: Duration,
}

impl ChangeNotifier {
    pub fn new(
        store: Arc<ScopeStore>,
        publisher: Arc<dyn TopicPublisher>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            publish_timeout,
        }
    }

    /// Publish every directory changed in `range` to the scope's topics and
    /// return the directories. An empty range publishes nothing.
    ///
    /// Every directory is attempted; the first failure is returned once all
    /// attempts are done.
    pub async fn publish_changed_directories(
        &self,
        scope_id: &ScopeId,
        range: &CommitRange,
    ) -> Result<Vec<String>, ServerError> {
        if range.is_empty() {
            return Ok(vec![]);
        }

        let directories = {
            let store = self.store.clone();
            let scope_id = scope_id.clone();
            let range = range.clone();
            blocking(move || store.changed_directories(&scope_id, &range)).await?
        };

        let mut first_failure = None;
        for directory in &directories {
            let notification = Notification::policy_change(scope_id, directory, range);
            let topic = notification.topic.clone();
            let outcome = tokio::time::timeout(
                self.publish_timeout,
                self.publisher.publish(notification),
            )
            .await;

            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(_) => ServerError::PublishTimeout {
                    topic,
                    timeout_ms: self.publish_timeout.as_millis(),
                },
            };
            tracing::warn!(scope_id = %scope_id, error = %failure, "publishing change notification failed");
            first_failure.get_or_insert(failure);
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                tracing::info!(
                    scope_id = %scope_id,
                    range = %range,
                    directories = directories.len(),
                    "published change notifications",
                );
                Ok(directories.into_iter().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use scopehub_core::{
        CommitId, DataSourceConfig, GitAuth, MemoryScopeRepository, Scope, ScopePolicy,
    };
    use scopehub_git::fixtures::UpstreamRepo;
    use scopehub_sync::PullerOptions;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingPublisher {
        seen: Mutex<Vec<Notification>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl TopicPublisher for RecordingPublisher {
        async fn publish(&self, notification: Notification) -> Result<(), ServerError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen.lock().expect("lock").push(notification);
            Ok(())
        }
    }

    struct Fixture {
        _base: TempDir,
        upstream: UpstreamRepo,
        store: Arc<ScopeStore>,
        c1: CommitId,
    }

    fn fixture() -> Fixture {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("policies/a/x.rego", Some("package a"))], "c1");
        let base = TempDir::new().expect("base");
        let store = Arc::new(ScopeStore::new(
            Arc::new(MemoryScopeRepository::new()),
            base.path(),
            PullerOptions::default(),
        ));
        store
            .add_scope(Scope {
                scope_id: ScopeId::from("demo"),
                policy: ScopePolicy {
                    source_type: "git".into(),
                    url: upstream.url(),
                    branch: None,
                    polling: true,
                    directories: vec!["policies".into()],
                    extensions: vec![".rego".into()],
                    manifest: ".manifest".into(),
                    auth: GitAuth::None,
                },
                data: DataSourceConfig::default(),
            })
            .expect("add");
        Fixture {
            _base: base,
            upstream,
            store,
            c1,
        }
    }

    #[tokio::test]
    async fn one_notification_per_changed_directory() {
        let fx = fixture();
        let c2 = fx.upstream.commit(
            &[
                ("policies/a/x.rego", Some("package a\nallow = true")),
                ("policies/b/y.rego", Some("package b")),
            ],
            "c2",
        );
        let range = fx
            .store
            .pull_scope(&ScopeId::from("demo"))
            .expect("pull");
        assert_eq!(range, CommitRange::new(Some(fx.c1.clone()), c2));

        let publisher = Arc::new(RecordingPublisher::default());
        let notifier = ChangeNotifier::new(fx.store.clone(), publisher.clone(), Duration::from_secs(1));
        let dirs = notifier
            .publish_changed_directories(&ScopeId::from("demo"), &range)
            .await
            .expect("publish");

        assert_eq!(dirs, vec!["policies/a", "policies/b"]);
        let topics: Vec<String> = publisher
            .seen
            .lock()
            .expect("lock")
            .iter()
            .map(|n| n.topic.clone())
            .collect();
        assert_eq!(topics, vec!["demo:policy:policies/a", "demo:policy:policies/b"]);
    }

    #[tokio::test]
    async fn empty_range_publishes_nothing() {
        let fx = fixture();
        let publisher = Arc::new(RecordingPublisher::default());
        let notifier = ChangeNotifier::new(fx.store.clone(), publisher.clone(), Duration::from_secs(1));
        let range = CommitRange::new(Some(fx.c1.clone()), fx.c1.clone());
        let dirs = notifier
            .publish_changed_directories(&ScopeId::from("demo"), &range)
            .await
            .expect("publish");
        assert!(dirs.is_empty());
        assert!(publisher.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn slow_transport_is_reported_as_timeout() {
        let fx = fixture();
        let publisher = Arc::new(RecordingPublisher {
            seen: Mutex::default(),
            delay: Some(Duration::from_secs(5)),
        });
        let notifier =
            ChangeNotifier::new(fx.store.clone(), publisher, Duration::from_millis(20));
        let range = CommitRange::new(None, fx.c1.clone());
        let err = notifier
            .publish_changed_directories(&ScopeId::from("demo"), &range)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::PublishTimeout { .. }), "got: {err}");
    }
}
