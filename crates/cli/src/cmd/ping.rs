//! Check that the daemon answers

use super::{print_json, Context};
use anyhow::Result;
use bsync_cli::ipc::protocol::{methods, PingResult};
use bsync_cli::util::format_duration;
use serde_json::Value;
use std::time::Duration;

pub async fn run(ctx: &Context) -> Result<()> {
    let client = ctx.connect().await?;
    let pong: PingResult = client
        .call_timeout(methods::PING, Value::Null, ctx.call_timeout())
        .await?;

    if ctx.json {
        return print_json(&pong);
    }

    println!(
        "pong from pid {} (v{}, up {})",
        pong.pid,
        pong.version,
        format_duration(Duration::from_millis(pong.uptime_ms))
    );
    Ok(())
}
