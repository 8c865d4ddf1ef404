//! Scopehub core library: domain types, the durable scope registry, errors.
//!
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`RegistryError`]
//! - [`registry`]: the [`ScopeRepository`] storage port and its implementations

pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use registry::{MemoryScopeRepository, ScopeRepository, YamlScopeRepository};
pub use types::{
    CommitId, CommitRange, DataSourceConfig, GitAuth, Scope, ScopeId, ScopePolicy, ScopeRecord,
};
