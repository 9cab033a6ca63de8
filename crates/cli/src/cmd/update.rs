//! Run one generation pass now

use super::{print_json, Context};
use anyhow::{Context as _, Result};
use bsync_cli::ipc::protocol::{methods, UpdateRunParams, UpdateRunResult};
use bsync_cli::util::format_duration;
use bsync_core::debug_event;
use owo_colors::OwoColorize;
use std::time::Duration;

pub async fn run(ctx: &Context, incremental: bool) -> Result<()> {
    let result = match ctx.connect().await {
        // Generation may take arbitrarily long: no call timeout
        Ok(client) => {
            client
                .call::<_, UpdateRunResult>(methods::UPDATE_RUN, UpdateRunParams { incremental })
                .await?
        }
        Err(e) if e.is_not_running() => {
            debug_event!("update", "no daemon, running locally");
            run_local(ctx, incremental).await?
        }
        Err(e) => return Err(e.into()),
    };

    if ctx.json {
        return print_json(&result);
    }

    let elapsed = format_duration(Duration::from_millis(result.elapsed_ms));
    if result.updated.is_empty() {
        println!("{} ({})", "Nothing to update".green(), elapsed);
    } else {
        println!(
            "{} {} directories in {}",
            "Updated".green(),
            result.updated.len(),
            elapsed
        );
        for dir in &result.updated {
            println!("  {}", dir);
        }
    }
    Ok(())
}

async fn run_local(ctx: &Context, incremental: bool) -> Result<UpdateRunResult> {
    let updater = ctx.local_updater()?;
    let outcome = tokio::task::spawn_blocking(move || updater.run_pass(incremental))
        .await
        .context("Update task failed")??;

    Ok(UpdateRunResult {
        updated: outcome.updated,
        elapsed_ms: outcome.elapsed.as_millis() as u64,
    })
}
