//! Domain types for the scope registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde (YAML on disk, JSON on the wire).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed scope identifier.
///
/// Doubles as the clone directory name and the topic prefix, so it must be a
/// single, non-hidden path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub String);

impl ScopeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject identifiers that cannot name a directory under the base dir.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let id = self.0.as_str();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id.len() > 128 {
            Some("must be at most 128 characters")
        } else if id.starts_with('.') {
            Some("must not start with '.'")
        } else if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            Some("may only contain ASCII letters, digits, '-', '_' and '.'")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(RegistryError::InvalidScopeId {
                scope_id: id.to_owned(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ScopeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Hex object id of a commit inside a scope's git history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Commit range
// ---------------------------------------------------------------------------

/// Ordered pair of commits within one history. `old` is `None` when diffing
/// from the empty tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    pub old: Option<CommitId>,
    pub new: CommitId,
}

impl CommitRange {
    pub fn new(old: Option<CommitId>, new: CommitId) -> Self {
        Self { old, new }
    }

    /// True when both ends name the same commit.
    pub fn is_empty(&self) -> bool {
        self.old.as_ref() == Some(&self.new)
    }
}

impl fmt::Display for CommitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old {
            Some(old) => write!(f, "{old}..{}", self.new),
            None => write!(f, "..{}", self.new),
        }
    }
}

// ---------------------------------------------------------------------------
// Scope configuration
// ---------------------------------------------------------------------------

/// Credentials used to reach a scope's upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "auth_type", rename_all = "lowercase")]
pub enum GitAuth {
    #[default]
    None,
    /// HTTPS basic auth with an access token as the password.
    Token {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        token: String,
    },
    Ssh {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        private_key: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

/// Policy selection for a scope: where the source lives and which files ship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePolicy {
    /// Puller variant key, e.g. `"git"`.
    pub source_type: String,
    pub url: String,
    /// Tracked branch; the upstream's default branch when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, alias = "poll_updates")]
    pub polling: bool,
    #[serde(default = "default_directories")]
    pub directories: Vec<String>,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default, skip_serializing_if = "is_no_auth")]
    pub auth: GitAuth,
}

fn default_directories() -> Vec<String> {
    vec![".".to_owned()]
}

fn default_extensions() -> Vec<String> {
    vec![".rego".to_owned(), ".json".to_owned()]
}

fn default_manifest() -> String {
    ".manifest".to_owned()
}

fn is_no_auth(auth: &GitAuth) -> bool {
    matches!(auth, GitAuth::None)
}

/// Data-source configuration. Opaque to the registry; served back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DataSourceConfig(pub serde_json::Value);

/// A named, independently configured policy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub scope_id: ScopeId,
    pub policy: ScopePolicy,
    #[serde(default)]
    pub data: DataSourceConfig,
}

impl Scope {
    /// True when `other` points at the same upstream (type, URL and branch).
    pub fn same_source(&self, other: &Scope) -> bool {
        self.policy.source_type == other.policy.source_type
            && self.policy.url == other.policy.url
            && self.policy.branch == other.policy.branch
    }
}

// ---------------------------------------------------------------------------
// Durable record
// ---------------------------------------------------------------------------

/// One durable registry entry per scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRecord {
    /// Registration order; `list` sorts by it.
    pub seq: u64,
    pub scope: Scope,
    /// Last head commit observed by a successful pull (or the initial clone).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<CommitId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ScopeId::from("demo").to_string(), "demo");
        assert_eq!(CommitId::from("abc123").to_string(), "abc123");
    }

    #[test]
    fn scope_id_validation() {
        assert!(ScopeId::from("tenant-1_prod.v2").validate().is_ok());
        for bad in ["", ".hidden", "a/b", "..", "white space", "x\\y"] {
            assert!(
                matches!(
                    ScopeId::from(bad).validate(),
                    Err(RegistryError::InvalidScopeId { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn commit_range_emptiness() {
        let a = CommitId::from("a");
        let b = CommitId::from("b");
        assert!(CommitRange::new(Some(a.clone()), a.clone()).is_empty());
        assert!(!CommitRange::new(Some(a), b.clone()).is_empty());
        assert!(!CommitRange::new(None, b).is_empty());
    }

    #[test]
    fn policy_defaults_apply_on_deserialize() {
        let yaml = "source_type: git\nurl: https://example.com/policies.git\n";
        let policy: ScopePolicy = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(policy.directories, vec!["."]);
        assert_eq!(policy.extensions, vec![".rego", ".json"]);
        assert_eq!(policy.manifest, ".manifest");
        assert!(!policy.polling);
        assert_eq!(policy.auth, GitAuth::None);
    }

    #[test]
    fn poll_updates_alias_is_accepted() {
        let json = r#"{"source_type":"git","url":"u","poll_updates":true}"#;
        let policy: ScopePolicy = serde_json::from_str(json).expect("parse");
        assert!(policy.polling);
    }

    #[test]
    fn token_auth_serde_shape() {
        let json = r#"{"auth_type":"token","token":"s3cret"}"#;
        let auth: GitAuth = serde_json::from_str(json).expect("parse");
        assert_eq!(
            auth,
            GitAuth::Token {
                username: None,
                token: "s3cret".into()
            }
        );
    }

    #[test]
    fn scope_json_roundtrip_keeps_opaque_data() {
        let json = r#"{
            "scope_id": "demo",
            "policy": {"source_type": "git", "url": "u", "directories": ["policies"]},
            "data": {"entries": [{"url": "https://api/data", "topics": ["x"]}]}
        }"#;
        let scope: Scope = serde_json::from_str(json).expect("parse");
        let back: Scope =
            serde_json::from_str(&serde_json::to_string(&scope).expect("encode")).expect("decode");
        assert_eq!(scope, back);
        assert_eq!(scope.data.0["entries"][0]["topics"][0], "x");
    }
}
