//! Trigger sources: the periodic sweep and push-webhook ingestion.
//!
//! Both isolate failures per scope. One scope's fetch error is logged and
//! reported, and the remaining scopes are still processed.

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::Serialize;

use scopehub_core::{CommitRange, ScopeId};
use scopehub_sync::{plan_webhook, WebhookPlan, EVENT_HEADER, SIGNATURE_HEADER};

use crate::error::ServerError;
use crate::state::{blocking, AppState};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeUpdate {
    pub scope_id: ScopeId,
    pub old_commit: Option<String>,
    pub new_commit: String,
    pub directories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeFailure {
    pub scope_id: ScopeId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub updated: Vec<ScopeUpdate>,
    pub unchanged: Vec<ScopeId>,
    /// Scopes with polling disabled.
    pub skipped: Vec<ScopeId>,
    pub failed: Vec<ScopeFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub event: String,
    pub ignored: bool,
    pub updated: Vec<ScopeUpdate>,
    pub failed: Vec<ScopeFailure>,
}

impl WebhookReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// 1. Periodic sweep
// ---------------------------------------------------------------------------

/// Poll every polling-enabled scope in registration order, pulling and
/// notifying the ones whose upstream moved.
pub async fn run_sweep(state: &AppState) -> Result<SweepReport, ServerError> {
    let mut report = SweepReport::default();

    for scope in state.all_scopes().await? {
        let scope_id = scope.scope_id.clone();
        if !scope.policy.polling {
            report.skipped.push(scope_id);
            continue;
        }

        let polled = {
            let store = state.store.clone();
            let scope_id = scope_id.clone();
            blocking(move || store.poll_scope(&scope_id)).await
        };

        match polled {
            Ok(None) => report.unchanged.push(scope_id),
            Ok(Some(range)) => match notify(state, &scope_id, &range).await {
                Ok(update) => report.updated.push(update),
                Err(failure) => report.failed.push(failure),
            },
            Err(err) => {
                tracing::warn!(scope_id = %scope_id, error = %err, "sweep failed for scope");
                report.failed.push(ScopeFailure {
                    scope_id,
                    error: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        updated = report.updated.len(),
        unchanged = report.unchanged.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "periodic sweep finished",
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// 2. Webhook
// ---------------------------------------------------------------------------

/// Authenticate a push webhook, then pull and notify every scope whose clone
/// follows the pushed branch, using the event's own before/after range.
pub async fn handle_push_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<WebhookReport, ServerError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    let event_type = header(EVENT_HEADER);
    let signature = header(SIGNATURE_HEADER);

    let targets = {
        let store = state.store.clone();
        blocking(move || store.webhook_targets()).await?
    };
    let plan = plan_webhook(
        state.settings.webhook_secret.as_deref(),
        event_type.as_deref(),
        signature.as_deref(),
        &body,
        &targets,
    )?;

    let (event, matched) = match plan {
        WebhookPlan::Ignored { event } => {
            tracing::debug!(event = %event, "ignoring webhook event");
            return Ok(WebhookReport {
                event,
                ignored: true,
                ..WebhookReport::default()
            });
        }
        WebhookPlan::Push { event, scopes } => (event, scopes),
    };

    tracing::info!(
        git_ref = ?event.git_ref,
        range = %event.range,
        matched = matched.len(),
        "received push webhook",
    );

    let mut report = WebhookReport {
        event: "push".to_owned(),
        ..WebhookReport::default()
    };
    for scope_id in matched {
        let pulled = {
            let store = state.store.clone();
            let scope_id = scope_id.clone();
            blocking(move || store.pull_scope(&scope_id)).await
        };
        if let Err(err) = pulled {
            tracing::error!(scope_id = %scope_id, error = %err, "webhook-triggered pull failed");
            report.failed.push(ScopeFailure {
                scope_id,
                error: err.to_string(),
            });
            continue;
        }

        match notify(state, &scope_id, &event.range).await {
            Ok(update) => report.updated.push(update),
            Err(failure) => report.failed.push(failure),
        }
    }
    Ok(report)
}

async fn notify(
    state: &AppState,
    scope_id: &ScopeId,
    range: &CommitRange,
) -> Result<ScopeUpdate, ScopeFailure> {
    match state.notifier.publish_changed_directories(scope_id, range).await {
        Ok(directories) => Ok(ScopeUpdate {
            scope_id: scope_id.clone(),
            old_commit: range.old.as_ref().map(|c| c.0.clone()),
            new_commit: range.new.0.clone(),
            directories,
        }),
        Err(err) => {
            tracing::error!(scope_id = %scope_id, error = %err, "change notification failed");
            Err(ScopeFailure {
                scope_id: scope_id.clone(),
                error: err.to_string(),
            })
        }
    }
}
