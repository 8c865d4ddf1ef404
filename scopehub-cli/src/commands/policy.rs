//! `scopehub policy`: fetch a bundle and summarize it.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use crate::client::Client;

#[derive(Args, Debug)]
pub struct PolicyArgs {
    pub scope_id: String,

    /// Commit the caller already has; the server answers with a diff from it.
    #[arg(long)]
    pub base_hash: Option<String>,

    /// Print the raw bundle JSON.
    #[arg(long)]
    pub json: bool,
}

impl PolicyArgs {
    pub fn run(self, client: &Client) -> Result<()> {
        let mut query = Vec::new();
        if let Some(base) = &self.base_hash {
            query.push(("base_hash", base.as_str()));
        }
        let bundle = client
            .get(&format!("/scopes/{}/policy", self.scope_id), &query)
            .with_context(|| format!("failed to fetch bundle for '{}'", self.scope_id))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&bundle).context("failed to render bundle JSON")?
            );
            return Ok(());
        }

        let kind = if bundle["old_hash"].is_string() { "diff" } else { "full" };
        println!(
            "{} {} bundle at {}",
            self.scope_id.bold(),
            kind,
            bundle["hash"].as_str().unwrap_or("?")
        );
        for entry in bundle["entries"].as_array().into_iter().flatten() {
            println!("  {}", entry_line(entry));
        }
        Ok(())
    }
}

fn entry_line(entry: &Value) -> String {
    let path = entry["path"].as_str().unwrap_or("?");
    if entry["is_deleted"].as_bool().unwrap_or(false) {
        format!("{} {path}", "-".red().bold())
    } else {
        format!("{} {path}", "+".green().bold())
    }
}
