//! Run the daemon in the foreground

use super::Context;
use anyhow::{Context as _, Result};
use bsync_cli::util;
use bsync_core::logging;

pub async fn run(ctx: Context, watch: bool) -> Result<()> {
    let logs = util::logs_dir(&ctx.root);
    std::fs::create_dir_all(&logs).context("Failed to create logs directory")?;

    let appender = tracing_appender::rolling::never(&logs, util::DAEMON_LOG);
    let (writer, _guard) = tracing_appender::non_blocking(appender);
    logging::init_with_writer(&ctx.settings.logging, writer, false);

    bsync_cli::daemon::run(&ctx.root, ctx.settings, watch).await
}
