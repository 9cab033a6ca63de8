//! Start the daemon in the background

use super::Context;
use anyhow::{Context as _, Result};
use bsync_cli::{daemon, util};
use owo_colors::OwoColorize;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// How long to wait for the new daemon to answer a ping
const START_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(ctx: &Context, watch: bool) -> Result<()> {
    let socket = ctx.socket_path();
    if daemon::is_running(&socket).await {
        println!("Daemon already running ({})", socket.display());
        return Ok(());
    }

    let logs = util::logs_dir(&ctx.root);
    std::fs::create_dir_all(&logs).context("Failed to create logs directory")?;
    let log_file = logs.join(util::DAEMON_LOG);

    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut command = Command::new(exe);
    command.arg("--root").arg(&ctx.root);
    if !ctx.settings.languages.is_empty() {
        command.arg("--languages").arg(ctx.settings.languages.join(","));
    }
    if ctx.settings.watch.verbose {
        command.arg("--verbose");
    }
    command.arg("daemon");
    if watch {
        command.arg("--watch");
    }

    // Detach from the terminal's process group so Ctrl-C here does not reach it
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .context("Failed to spawn daemon process")?;

    let deadline = Instant::now() + START_TIMEOUT;
    while Instant::now() < deadline {
        if daemon::is_running(&socket).await {
            println!("{}", "Daemon started".green());
            println!("  Socket: {}", socket.display());
            println!("  Logs:   {}", log_file.display());
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    anyhow::bail!(
        "Daemon failed to start (check logs at {})",
        log_file.display()
    )
}
