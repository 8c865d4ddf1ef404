//! Server process: tracing setup, seeding, and the task set that runs until
//! shutdown.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use scopehub_core::{Scope, YamlScopeRepository};
use scopehub_sync::{PullerOptions, ScopeStore};

use crate::config::{LogFormat, ServerConfig};
use crate::error::{io_err, ServerError};
use crate::routes::build_router;
use crate::state::{blocking, ApiSettings, AppState};
use crate::triggers::run_sweep;

/// Start the server and block the current thread until it exits.
pub fn start_blocking(config: ServerConfig) -> Result<(), ServerError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Wire the registry, store and HTTP state for `config`.
pub fn build_state(config: &ServerConfig) -> Result<AppState, ServerError> {
    fs::create_dir_all(&config.base_dir).map_err(|e| io_err(&config.base_dir, e))?;

    let repository = Arc::new(YamlScopeRepository::new(&config.base_dir));
    let options = PullerOptions {
        fetch_timeout: config.fetch_timeout,
    };
    let store = Arc::new(ScopeStore::new(
        repository,
        config.base_dir.clone(),
        options,
    ));
    Ok(AppState::new(store, ApiSettings::from_config(config)))
}

pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let state = build_state(&config)?;
    if let Some(seed_file) = &config.seed_file {
        seed_scopes(&state, seed_file).await?;
    }

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| io_err(config.bind_addr.to_string(), e))?;
    tracing::info!(
        addr = %config.bind_addr,
        base_dir = %config.base_dir.display(),
        "scopehub listening",
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let http_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = http_task(listener, state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let polling_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let interval = config.polling_interval;
        tokio::spawn(async move {
            let result = polling_task(state, interval, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(io_err("ctrl-c handler", err)),
                    }
                }
            }
        })
    };

    let (http_result, polling_result, signal_result) =
        tokio::join!(http_handle, polling_handle, signal_handle);

    handle_join("http", http_result)?;
    handle_join("polling", polling_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn http_task(
    listener: TcpListener,
    state: AppState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let hub = state.hub.clone();
    let local_addr = listener
        .local_addr()
        .map_err(|e| io_err("tcp-listener", e))?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            // Open notification streams would otherwise hold the server open.
            hub.close_all();
        })
        .await
        .map_err(|e| io_err(local_addr.to_string(), e))
}

async fn polling_task(
    state: AppState,
    period: Option<Duration>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let Some(period) = period else {
        tracing::info!("periodic polling disabled");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(err) = run_sweep(&state).await {
                    tracing::error!(error = %err, "periodic sweep failed");
                }
            }
        }
    }
    Ok(())
}

/// Register every scope listed in a YAML seed file. A scope that fails to
/// register is logged and skipped.
pub async fn seed_scopes(state: &AppState, path: &Path) -> Result<usize, ServerError> {
    let raw = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let scopes: Vec<Scope> = serde_yaml::from_str(&raw).map_err(|source| ServerError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;

    let mut registered = 0;
    for scope in scopes {
        let scope_id = scope.scope_id.clone();
        let store = state.store.clone();
        match blocking(move || store.add_scope(scope)).await {
            Ok(head) => {
                tracing::info!(scope_id = %scope_id, head = %head, "seeded scope");
                registered += 1;
            }
            Err(err) => tracing::warn!(scope_id = %scope_id, error = %err, "failed to seed scope"),
        }
    }
    Ok(registered)
}

fn handle_join(
    task: &str,
    result: Result<Result<(), ServerError>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ServerError::Join(format!("{task} task join failure: {err}"))),
    }
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(false).try_init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
}
