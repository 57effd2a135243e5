//! `respond` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use clock_sync::{ClockResponder, ClockSource, OffsetClock, SystemClock};

use super::shutdown_signal;
use crate::cli::RespondArgs;

/// Execute the `respond` command
pub async fn run_respond(args: &RespondArgs) -> Result<()> {
    let clock: Arc<dyn ClockSource> = if args.offset_ms == 0.0 {
        Arc::new(SystemClock)
    } else {
        info!(offset_ms = args.offset_ms, "Reporting shifted timestamps");
        Arc::new(OffsetClock::from_millis(args.offset_ms))
    };

    let responder = ClockResponder::bind(args.bind, clock)
        .await
        .with_context(|| format!("Failed to bind clock responder on {}", args.bind))?;
    let addr = responder.local_addr()?;
    info!(addr = %addr, "Answering clock sync requests");

    let cancel = CancellationToken::new();
    let run = responder.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            result.context("Clock responder stopped")?;
        }
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, stopping responder...");
            cancel.cancel();
            run.await.context("Clock responder stopped")?;
        }
    }

    info!(
        answered = responder.answered(),
        dropped = responder.dropped(),
        "Clock responder finished"
    );
    Ok(())
}
