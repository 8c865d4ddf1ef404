//! `scopehub check`: run one sweep on the server and print its report.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use crate::client::Client;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the raw report JSON.
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    pub fn run(self, client: &Client) -> Result<()> {
        let report = client
            .post::<Value>("/scopes/periodic-check", None)
            .context("periodic check failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render report JSON")?
            );
            return Ok(());
        }

        for update in report["updated"].as_array().into_iter().flatten() {
            println!(
                "{} {} -> {} ({})",
                "updated".green().bold(),
                update["scope_id"].as_str().unwrap_or("?"),
                update["new_commit"].as_str().unwrap_or("?"),
                join(&update["directories"]),
            );
        }
        for failure in report["failed"].as_array().into_iter().flatten() {
            println!(
                "{} {}: {}",
                "failed".red().bold(),
                failure["scope_id"].as_str().unwrap_or("?"),
                failure["error"].as_str().unwrap_or("?"),
            );
        }
        println!(
            "{} unchanged, {} skipped",
            count(&report["unchanged"]),
            count(&report["skipped"]),
        );
        Ok(())
    }
}

fn count(value: &Value) -> usize {
    value.as_array().map(Vec::len).unwrap_or(0)
}

fn join(value: &Value) -> String {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
