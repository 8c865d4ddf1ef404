//! Push-webhook validation and scope matching.
//!
//! [`plan_webhook`] is pure: raw body and headers in, a [`WebhookPlan`] out.
//! Pulling and publishing for the matched scopes is the caller's job.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use scopehub_core::{CommitId, CommitRange, ScopeId};

use crate::error::WebhookError;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

const SIGNATURE_PREFIX: &str = "sha256=";
const BRANCH_REF_PREFIX: &str = "refs/heads/";
const ZERO_COMMIT: &str = "0000000000000000000000000000000000000000";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: Option<String>,
    #[serde(default)]
    before: Option<String>,
    after: String,
    repository: PushRepository,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    #[serde(default)]
    clone_url: Option<String>,
    #[serde(default)]
    git_url: Option<String>,
    #[serde(default)]
    ssh_url: Option<String>,
}

/// The parts of a push event the service acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Pushed ref, e.g. `refs/heads/main`.
    pub git_ref: Option<String>,
    /// `before..after`; `old` is `None` for a newly created branch.
    pub range: CommitRange,
    /// Every URL variant the payload names for the repository.
    pub urls: Vec<String>,
}

/// A registered scope as the matcher sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub scope_id: ScopeId,
    pub url: String,
    /// Branch the scope's clone follows: the configured one, or the default
    /// branch resolved at clone time. `None` when it cannot be determined;
    /// such a scope never matches.
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookPlan {
    /// Authentic, but nothing to do (non-push event, tag push or branch
    /// deletion).
    Ignored { event: String },
    /// Scopes whose source matches the pushed repository and branch.
    Push { event: PushEvent, scopes: Vec<ScopeId> },
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Verify `sha256=<hex>` against HMAC-SHA256 of `body`. Without a configured
/// secret every request is rejected.
pub fn verify_signature(
    secret: Option<&str>,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), WebhookError> {
    let secret = secret.ok_or(WebhookError::InvalidSignature)?;
    let signature = signature.ok_or(WebhookError::InvalidSignature)?;
    let hex_digest = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(WebhookError::InvalidSignature)?;
    let expected = hex::decode(hex_digest).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// `sha256=<hex>` signature header value for `body`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Authenticate the request, then decide which scopes it should pull.
///
/// The signature is checked before the body is parsed; a forged request never
/// reaches the JSON decoder.
pub fn plan_webhook(
    secret: Option<&str>,
    event_type: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    targets: &[WebhookTarget],
) -> Result<WebhookPlan, WebhookError> {
    verify_signature(secret, body, signature)?;

    let event_type = event_type.unwrap_or_default().trim();
    if event_type != "push" {
        return Ok(WebhookPlan::Ignored {
            event: event_type.to_owned(),
        });
    }

    let payload: PushPayload = serde_json::from_slice(body)?;
    let Some(pushed_branch) = payload
        .git_ref
        .as_deref()
        .and_then(|git_ref| git_ref.strip_prefix(BRANCH_REF_PREFIX))
        .map(str::to_owned)
    else {
        return Ok(WebhookPlan::Ignored {
            event: "push (not a branch)".to_owned(),
        });
    };
    if payload.after == ZERO_COMMIT {
        return Ok(WebhookPlan::Ignored {
            event: "push (branch deleted)".to_owned(),
        });
    }

    let urls: Vec<String> = [
        payload.repository.clone_url,
        payload.repository.git_url,
        payload.repository.ssh_url,
    ]
    .into_iter()
    .flatten()
    .collect();

    let matched = targets
        .iter()
        .filter(|target| target.branch.as_deref() == Some(pushed_branch.as_str()))
        .filter(|target| urls.iter().any(|url| same_repository(url, &target.url)))
        .map(|target| target.scope_id.clone())
        .collect();

    let old = payload
        .before
        .filter(|before| before != ZERO_COMMIT && !before.is_empty())
        .map(CommitId);
    let event = PushEvent {
        git_ref: payload.git_ref,
        range: CommitRange::new(old, CommitId(payload.after)),
        urls,
    };
    Ok(WebhookPlan::Push {
        event,
        scopes: matched,
    })
}

/// URLs name the same repository when equal after dropping a trailing `/`
/// and `.git`.
fn same_repository(a: &str, b: &str) -> bool {
    a == b || normalize_url(a) == normalize_url(b)
}

fn normalize_url(url: &str) -> &str {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix(".git").unwrap_or(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SECRET: &str = "webhook-secret";
    const BEFORE: &str = "1111111111111111111111111111111111111111";
    const AFTER: &str = "2222222222222222222222222222222222222222";

    fn target(id: &str, url: &str, branch: Option<&str>) -> WebhookTarget {
        WebhookTarget {
            scope_id: ScopeId::from(id),
            url: url.into(),
            branch: branch.map(str::to_owned),
        }
    }

    fn push_body(git_ref: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "ref": git_ref,
            "before": BEFORE,
            "after": AFTER,
            "repository": {
                "clone_url": "https://github.com/acme/policies.git",
                "git_url": "git://github.com/acme/policies.git",
                "ssh_url": "git@github.com:acme/policies.git",
            }
        }))
        .expect("encode")
    }

    fn plan(
        event: &str,
        body: &[u8],
        targets: &[WebhookTarget],
    ) -> Result<WebhookPlan, WebhookError> {
        let signature = sign_payload(SECRET, body);
        plan_webhook(Some(SECRET), Some(event), Some(&signature), body, targets)
    }

    #[test]
    fn tampered_body_is_rejected_and_resigned_body_accepted() {
        let body = push_body("refs/heads/main");
        let signature = sign_payload(SECRET, &body);

        let mut tampered = body.clone();
        let pos = tampered.len() - 3;
        tampered[pos] = b'X';
        let err = plan_webhook(Some(SECRET), Some("push"), Some(&signature), &tampered, &[])
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));

        let resigned = sign_payload(SECRET, &tampered);
        assert!(verify_signature(Some(SECRET), &tampered, Some(&resigned)).is_ok());
    }

    #[rstest]
    #[case::no_secret(None, Some("sha256=00"))]
    #[case::no_header(Some(SECRET), None)]
    #[case::no_prefix(Some(SECRET), Some("deadbeef"))]
    #[case::not_hex(Some(SECRET), Some("sha256=zz"))]
    fn missing_pieces_are_rejected(#[case] secret: Option<&str>, #[case] signature: Option<&str>) {
        let err = verify_signature(secret, b"{}", signature).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = push_body("refs/heads/main");
        let signature = sign_payload("other-secret", &body);
        assert!(verify_signature(Some(SECRET), &body, Some(&signature)).is_err());
    }

    #[test]
    fn non_push_events_are_ignored() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let outcome = plan("ping", body, &[]).expect("plan");
        assert_eq!(
            outcome,
            WebhookPlan::Ignored {
                event: "ping".into()
            }
        );
    }

    #[rstest]
    #[case("https://github.com/acme/policies.git")]
    #[case("https://github.com/acme/policies")]
    #[case("https://github.com/acme/policies/")]
    #[case("git@github.com:acme/policies.git")]
    #[case("git://github.com/acme/policies.git")]
    fn url_variants_match(#[case] url: &str) {
        let scopes = vec![
            target("matching", url, Some("main")),
            target("other", "https://github.com/acme/other.git", Some("main")),
        ];
        let outcome = plan("push", &push_body("refs/heads/main"), &scopes).expect("plan");
        match outcome {
            WebhookPlan::Push { event, scopes } => {
                assert_eq!(scopes, vec![ScopeId::from("matching")]);
                assert_eq!(event.range.old, Some(CommitId::from(BEFORE)));
                assert_eq!(event.range.new, CommitId::from(AFTER));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn only_the_tracked_branch_matches() {
        let url = "https://github.com/acme/policies.git";
        let targets = vec![
            target("tracks-main", url, Some("main")),
            target("tracks-dev", url, Some("dev")),
            target("unresolved", url, None),
        ];
        let outcome = plan("push", &push_body("refs/heads/dev"), &targets).expect("plan");
        let WebhookPlan::Push { scopes, .. } = outcome else {
            panic!("expected push plan");
        };
        assert_eq!(scopes, vec![ScopeId::from("tracks-dev")]);
    }

    #[test]
    fn feature_branch_push_matches_no_default_branch_scope() {
        let targets = vec![target(
            "demo",
            "https://github.com/acme/policies.git",
            Some("main"),
        )];
        let outcome = plan("push", &push_body("refs/heads/feature"), &targets).expect("plan");
        let WebhookPlan::Push { scopes, .. } = outcome else {
            panic!("expected push plan");
        };
        assert!(scopes.is_empty());
    }

    #[rstest]
    #[case("refs/tags/v1.0.0")]
    #[case("refs/pull/7/head")]
    fn non_branch_refs_are_ignored(#[case] git_ref: &str) {
        let targets = vec![target(
            "demo",
            "https://github.com/acme/policies.git",
            Some("main"),
        )];
        let outcome = plan("push", &push_body(git_ref), &targets).expect("plan");
        assert_eq!(
            outcome,
            WebhookPlan::Ignored {
                event: "push (not a branch)".into()
            }
        );
    }

    #[test]
    fn created_branch_diffs_from_empty_tree() {
        let body = serde_json::to_vec(&serde_json::json!({
            "ref": "refs/heads/main",
            "before": ZERO_COMMIT,
            "after": AFTER,
            "repository": { "clone_url": "https://github.com/acme/policies.git" }
        }))
        .expect("encode");
        let WebhookPlan::Push { event, .. } = plan("push", &body, &[]).expect("plan") else {
            panic!("expected push plan");
        };
        assert_eq!(event.range.old, None);
    }

    #[test]
    fn deleted_branch_is_ignored() {
        let body = serde_json::to_vec(&serde_json::json!({
            "ref": "refs/heads/main",
            "before": BEFORE,
            "after": ZERO_COMMIT,
            "repository": { "clone_url": "https://github.com/acme/policies.git" }
        }))
        .expect("encode");
        assert!(matches!(
            plan("push", &body, &[]).expect("plan"),
            WebhookPlan::Ignored { .. }
        ));
    }

    #[test]
    fn authentic_but_malformed_push_is_reported() {
        let err = plan("push", b"not json", &[]).unwrap_err();
        assert!(matches!(err, WebhookError::MalformedPayload(_)));
    }
}
