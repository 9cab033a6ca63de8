//! Stop the daemon

use super::Context;
use anyhow::Result;
use bsync_cli::ipc::protocol::{methods, ShutdownResult};
use serde_json::Value;
use std::time::{Duration, Instant};

/// How long to wait for the socket to disappear
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(ctx: &Context) -> Result<()> {
    let client = match ctx.connect().await {
        Ok(client) => client,
        Err(e) if e.is_not_running() => {
            println!("Daemon is not running");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let _: ShutdownResult = client
        .call_timeout(methods::SHUTDOWN, Value::Null, ctx.call_timeout())
        .await?;
    client.close();

    let socket = ctx.socket_path();
    let deadline = Instant::now() + STOP_TIMEOUT;
    while socket.exists() {
        if Instant::now() >= deadline {
            anyhow::bail!("Daemon did not exit within {:?}", STOP_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("Daemon stopped");
    Ok(())
}
