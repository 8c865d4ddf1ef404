//! `scopehub serve`: run the server in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use scopehub_server::{start_blocking, ServerConfig};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// YAML config file; `SCOPEHUB_*` environment variables override it.
    #[arg(long, env = "SCOPEHUB_CONFIG")]
    pub config: Option<PathBuf>,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let config = ServerConfig::load(self.config.as_deref())
            .context("failed to load server configuration")?;
        start_blocking(config).context("server exited with error")
    }
}
