//! Show daemon, watch session and staleness status

use super::{print_json, Context};
use anyhow::Result;
use bsync_cli::ipc::protocol::{methods, PingResult, StatusGetResult, WatchStatusResult};
use bsync_cli::util;
use owo_colors::OwoColorize;
use serde_json::{json, Value};
use std::time::Duration;

/// Stale directories listed before truncating
const MAX_LISTED_DIRS: usize = 10;

pub async fn run(ctx: &Context) -> Result<()> {
    let client = match ctx.connect().await {
        Ok(client) => client,
        Err(e) if e.is_not_running() => return report_not_running(ctx),
        Err(e) => return Err(e.into()),
    };

    let timeout = ctx.call_timeout();
    let ping: PingResult = client
        .call_timeout(methods::PING, Value::Null, timeout)
        .await?;
    let watch: WatchStatusResult = client
        .call_timeout(methods::WATCH_STATUS, Value::Null, timeout)
        .await?;
    let stale: StatusGetResult = client
        .call_timeout(methods::STATUS_GET, Value::Null, timeout)
        .await?;

    if ctx.json {
        return print_json(&json!({
            "running": true,
            "daemon": ping,
            "watch": watch,
            "status": stale,
        }));
    }

    println!("{}", "Workspace Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Workspace:     {}", ctx.root.display().to_string().cyan());
    println!();

    println!("Daemon:        {}", "Running ✓".green());
    println!("  PID:         {}", ping.pid);
    println!(
        "  Uptime:      {}",
        util::format_duration(Duration::from_millis(ping.uptime_ms))
    );
    println!();

    print!("Watching:      ");
    if watch.running {
        println!("{}", "Active".green());
        let paths = if watch.paths.is_empty() {
            "(root)".to_string()
        } else {
            watch.paths.join(", ")
        };
        println!("  Paths:       {}", paths);
        if !watch.languages.is_empty() {
            println!("  Languages:   {}", watch.languages.join(", "));
        }
        println!("  Directories: {}", watch.watched_dirs);
        println!("  Debounce:    {}ms", watch.debounce_ms);
        println!("  Pending:     {}", watch.pending_dirs);
    } else {
        let state = watch.state.as_deref().unwrap_or("idle");
        println!("{}", state.yellow());
        println!("  {}", "Tip: Start with 'bsync watch'".dimmed());
    }
    println!("  Updates:     {}", watch.updates);
    if watch.errors > 0 {
        println!("  Errors:      {}", watch.errors.to_string().red());
    }
    if let Some(ts) = watch.last_update_ms {
        println!(
            "  Last:        {} ({})",
            util::format_relative_time(ts),
            util::format_absolute_time(ts).dimmed()
        );
    }
    println!();

    print_staleness(&stale);
    Ok(())
}

fn print_staleness(status: &StatusGetResult) {
    println!("Tracked files: {}", status.tracked_files);
    if !status.stale {
        println!("Build files:   {}", "Up to date".green());
        return;
    }

    println!(
        "Build files:   {}",
        format!("{} stale directories", status.dirs.len()).yellow()
    );
    for dir in status.dirs.iter().take(MAX_LISTED_DIRS) {
        println!("    - {}", dir);
    }
    if status.dirs.len() > MAX_LISTED_DIRS {
        println!("    ... and {} more", status.dirs.len() - MAX_LISTED_DIRS);
    }
    println!();
    println!(
        "{}",
        "Tip: Run 'bsync update --incremental' to regenerate them".dimmed()
    );
}

fn report_not_running(ctx: &Context) -> Result<()> {
    if ctx.json {
        return print_json(&json!({ "running": false }));
    }

    println!("Daemon:        {}", "Not running".yellow());
    println!("  {}", "Tip: Start with 'bsync start'".dimmed());
    Ok(())
}
