//! Registry error-message, atomic-write-safety, and roundtrip integration tests.
//! Storage layout: <base_dir>/registry/<scope_id>.yaml

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use scopehub_core::{
    CommitId, DataSourceConfig, GitAuth, RegistryError, Scope, ScopeId, ScopePolicy,
    ScopeRepository, YamlScopeRepository,
};
use std::fs;

fn demo() -> Scope {
    Scope {
        scope_id: ScopeId::from("demo"),
        policy: ScopePolicy {
            source_type: "git".into(),
            url: "https://github.com/acme/policies.git".into(),
            branch: Some("main".into()),
            polling: true,
            directories: vec!["policies".into()],
            extensions: vec![".rego".into(), ".json".into()],
            manifest: ".manifest".into(),
            auth: GitAuth::Token {
                username: None,
                token: "ghp_example".into(),
            },
        },
        data: DataSourceConfig(serde_json::json!({
            "entries": [{"url": "https://api.acme.dev/users", "topics": ["policy_data"]}]
        })),
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_scope_returns_none() {
    let base = assert_fs::TempDir::new().expect("tempdir");
    let repo = YamlScopeRepository::new(base.path());
    assert!(repo.get_scope(&ScopeId::from("demo")).expect("get").is_none());
    assert!(repo.list_scopes().expect("list").is_empty());
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let base = assert_fs::TempDir::new().expect("tempdir");
    base.child("registry").create_dir_all().expect("mkdir");
    base.child("registry/demo.yaml")
        .write_binary(b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let repo = YamlScopeRepository::new(base.path());
    let err = repo.get_scope(&ScopeId::from("demo")).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("demo.yaml"), "must contain file path, got: {msg}");
}

#[test]
fn load_wrong_type_yaml_returns_parse_error() {
    let base = assert_fs::TempDir::new().expect("tempdir");
    base.child("registry").create_dir_all().expect("mkdir");
    base.child("registry/demo.yaml")
        .write_str("- this is a list, not a mapping\n")
        .expect("write");

    let repo = YamlScopeRepository::new(base.path());
    let err = repo.list_scopes().unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let base = assert_fs::TempDir::new().expect("tempdir");
    let repo = YamlScopeRepository::new(base.path());
    repo.put_scope(&demo()).expect("put");

    let path = repo.record_path(&ScopeId::from("demo"));
    let original_bytes = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_file_name("demo.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original_bytes, fs::read(&path).expect("read after crash"));
    assert_eq!(repo.get_scope(&ScopeId::from("demo")).expect("get"), Some(demo()));
}

// ---------------------------------------------------------------------------
// 3. Roundtrip
// ---------------------------------------------------------------------------

#[test]
fn scope_and_head_survive_reopen() {
    let base = assert_fs::TempDir::new().expect("tempdir");
    {
        let repo = YamlScopeRepository::new(base.path());
        repo.put_scope(&demo()).expect("put");
        repo.set_head(&ScopeId::from("demo"), &CommitId::from("0123abcd"))
            .expect("set head");
    }

    let reopened = YamlScopeRepository::new(base.path());
    assert_eq!(reopened.get_scope(&ScopeId::from("demo")).expect("get"), Some(demo()));
    assert_eq!(
        reopened.get_head(&ScopeId::from("demo")).expect("head"),
        Some(CommitId::from("0123abcd"))
    );

    base.child("registry/demo.yaml")
        .assert(predicate::str::contains("0123abcd"));
}
