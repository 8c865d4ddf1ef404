//! `scopehub scope`: register and inspect scopes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use scopehub_core::Scope;

use crate::client::Client;

#[derive(Subcommand, Debug)]
pub enum ScopeCommand {
    /// Register a scope from a YAML or JSON definition.
    Add {
        /// Scope definition file.
        file: PathBuf,
    },
    /// Print a registered scope's configuration.
    Get {
        scope_id: String,
    },
}

pub fn run(command: ScopeCommand, client: &Client) -> Result<()> {
    match command {
        ScopeCommand::Add { file } => {
            let scope = read_scope(&file)?;
            client
                .post("/scopes", Some(&scope))
                .with_context(|| format!("failed to register scope '{}'", scope.scope_id))?;
            println!("{} registered scope {}", "✓".green().bold(), scope.scope_id.as_str().bold());
        }
        ScopeCommand::Get { scope_id } => {
            let scope = client
                .get(&format!("/scopes/{scope_id}"), &[])
                .with_context(|| format!("failed to fetch scope '{scope_id}'"))?;
            println!(
                "{}",
                serde_yaml::to_string(&scope).context("failed to render scope")?
            );
        }
    }
    Ok(())
}

/// JSON files parse as JSON; anything else as YAML.
fn read_scope(path: &Path) -> Result<Scope> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    if is_json {
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn yaml_and_json_definitions_agree() {
        let dir = TempDir::new().expect("tempdir");
        let yaml = dir.path().join("scope.yaml");
        let json = dir.path().join("scope.json");
        fs::write(
            &yaml,
            "scope_id: demo\npolicy:\n  source_type: git\n  url: https://example.com/p.git\n",
        )
        .expect("write yaml");
        fs::write(
            &json,
            r#"{"scope_id":"demo","policy":{"source_type":"git","url":"https://example.com/p.git"}}"#,
        )
        .expect("write json");

        assert_eq!(read_scope(&yaml).expect("yaml"), read_scope(&json).expect("json"));
    }
}
