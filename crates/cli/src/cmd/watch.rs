//! Watch the workspace and stream lifecycle events

use super::Context;
use anyhow::{Context as _, Result};
use bsync_cli::ipc::protocol::{codes, methods, WatchStartParams, WatchStartResult, WatchStopResult};
use bsync_core::{log_event, EventSink, WatchEvent};
use bsync_watcher::{WatchOptions, Watcher};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(
    ctx: &Context,
    paths: Vec<PathBuf>,
    debounce_ms: Option<u64>,
    local: bool,
) -> Result<()> {
    let paths = paths
        .iter()
        .map(|p| {
            p.canonicalize()
                .with_context(|| format!("Watch path {} does not exist", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    if local {
        run_local(ctx, paths, debounce_ms).await
    } else {
        run_attached(ctx, paths, debounce_ms).await
    }
}

/// Drive the daemon's watch session and print its events until Ctrl-C
async fn run_attached(ctx: &Context, paths: Vec<PathBuf>, debounce_ms: Option<u64>) -> Result<()> {
    let client = match ctx.connect().await {
        Ok(client) => client,
        Err(e) if e.is_not_running() => anyhow::bail!(
            "Daemon is not running (start it with 'bsync start' or use 'bsync watch --local')"
        ),
        Err(e) => return Err(e.into()),
    };

    // Subscribe first so the ready event is not missed
    let subscription = client.subscribe_events()?;
    let sink = ctx.event_sink();

    let params = WatchStartParams {
        paths: paths.iter().map(|p| p.display().to_string()).collect(),
        debounce_ms,
        languages: (!ctx.settings.languages.is_empty()).then(|| ctx.settings.languages.clone()),
    };

    let started_here = match client
        .call::<_, WatchStartResult>(methods::WATCH_START, params)
        .await
    {
        Ok(started) => {
            log_event!(
                "watch",
                "started",
                "{} directories under {} ({}ms debounce)",
                started.watched_dirs,
                started.root,
                started.debounce_ms
            );
            true
        }
        Err(e) if e.code() == Some(codes::WATCH_ALREADY_RUNNING) => {
            log_event!("watch", "attached to running session");
            false
        }
        Err(e) => return Err(e.into()),
    };

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            notification = subscription.recv() => {
                let Some(notification) = notification else {
                    log_event!("watch", "daemon closed the connection");
                    sink.flush();
                    return Ok(());
                };
                if let Some(event) = notification.as_watch_event() {
                    let ended = matches!(event, WatchEvent::Shutdown { .. });
                    sink.emit(event);
                    if ended {
                        sink.flush();
                        return Ok(());
                    }
                }
            }
        }
    }

    if started_here {
        let stopped: WatchStopResult = client
            .call_timeout(methods::WATCH_STOP, Value::Null, ctx.call_timeout())
            .await?;

        // Pick up the shutdown event emitted while stopping
        while let Ok(Some(notification)) =
            tokio::time::timeout(Duration::from_millis(200), subscription.recv()).await
        {
            if let Some(event) = notification.as_watch_event() {
                sink.emit(event);
            }
        }
        log_event!(
            "watch",
            "stopped",
            "{} updates, {} errors",
            stopped.updates,
            stopped.errors
        );
    }

    sink.flush();
    client.close();
    Ok(())
}

/// Watch in this process without a daemon
async fn run_local(ctx: &Context, paths: Vec<PathBuf>, debounce_ms: Option<u64>) -> Result<()> {
    let updater = ctx.local_updater()?;

    let mut options = WatchOptions::from_settings(&ctx.root, &ctx.settings);
    options.paths = paths;
    if let Some(debounce_ms) = debounce_ms {
        options.debounce = Duration::from_millis(debounce_ms);
    }

    let watcher = Arc::new(Watcher::new(options, updater)?);
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    watcher.run(cancel).await?;
    Ok(())
}
