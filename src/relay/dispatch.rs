//! Button dispatch task
//!
//! Sleeps until an edge handler raises a watched bit, then walks the raised
//! port bits through [`RelayController::toggle_port`]. A bit stays raised
//! while its button is held, so a held button is re-polled every `poll_ms`
//! until its release settles it.
//!
//! [`RelayController::toggle_port`]: super::RelayController::toggle_port

use super::controller::ToggleOutcome;
use super::events::RESET_BIT;
use super::reset::{check_reset_button, ResetOutcome};
use crate::error::FatalError;
use crate::node::DeviceContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const RESET_SETTLE: Duration = Duration::from_millis(10);

/// Runs until a factory reset completes
pub async fn run(ctx: Arc<DeviceContext>) -> Result<(), FatalError> {
    let mask = ctx.controller.watch_mask().await;
    let ports: Vec<usize> = ctx
        .controller
        .ports()
        .await
        .iter()
        .filter(|p| p.is_populated())
        .map(|p| p.index())
        .collect();
    info!("Button dispatch watching {} ports", ports.len());

    loop {
        let bits = ctx.events.wait_any(mask).await;

        for &index in &ports {
            let bit = index as u8;
            if !bits.contains(bit) {
                continue;
            }
            match ctx.controller.toggle_port(index, ctx.timing.debounce()).await {
                Ok(ToggleOutcome::Toggled { .. }) => {
                    ctx.sync_registry().await;
                    ctx.emit_telemetry().await;
                }
                Ok(outcome) if outcome.settles() => ctx.events.clear(bit),
                Ok(_) => {}
                Err(e) => warn!("Button on port {} unreadable: {}", index, e),
            }
        }

        if bits.contains(RESET_BIT) {
            match check_reset_button(&ctx).await? {
                ResetOutcome::FactoryReset => return Ok(()),
                ResetOutcome::Aborted => {
                    sleep(RESET_SETTLE).await;
                    ctx.events.clear(RESET_BIT);
                }
            }
        }

        sleep(ctx.timing.poll()).await;
    }
}
