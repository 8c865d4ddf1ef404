//! ScopeHub: policy-bundle distribution server and admin client.
//!
//! # Usage
//!
//! ```text
//! scopehub serve [--config <file>]
//! scopehub scope add <file>
//! scopehub scope get <scope_id>
//! scopehub policy <scope_id> [--base-hash <commit>]
//! scopehub check
//! ```

mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::Client;
use commands::{
    check::CheckArgs, policy::PolicyArgs, scope::ScopeCommand, serve::ServeArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "scopehub",
    version,
    about = "Serve and manage git-backed policy bundles per scope",
    long_about = None,
)]
struct Cli {
    /// Base URL of a running server.
    #[arg(
        long,
        global = true,
        env = "SCOPEHUB_SERVER",
        default_value = "http://127.0.0.1:7002"
    )]
    server: String,

    /// Bearer token for admin endpoints.
    #[arg(long, global = true, env = "SCOPEHUB_SCOPE_API_KEY", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the server in the foreground.
    Serve(ServeArgs),

    /// Register and inspect scopes.
    Scope {
        #[command(subcommand)]
        command: ScopeCommand,
    },

    /// Fetch a scope's policy bundle.
    Policy(PolicyArgs),

    /// Trigger a periodic check across all polling scopes.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new(&cli.server, cli.token);
    match cli.command {
        Commands::Serve(args) => args.run(),
        Commands::Scope { command } => commands::scope::run(command, &client),
        Commands::Policy(args) => args.run(&client),
        Commands::Check(args) => args.run(&client),
    }
}
