//! Long-press factory reset
//!
//! Holding the reset button for `reset_hold_polls` consecutive samples clears
//! both persisted flags and restarts the node into its unconfigured,
//! unprovisioned state.

use crate::error::FatalError;
use crate::lifecycle::RestartReason;
use crate::node::DeviceContext;
use crate::storage::{persist_flags, CONFIGURED_KEY, PROVISIONED_KEY};
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Released before the hold time
    Aborted,
    FactoryReset,
}

pub async fn check_reset_button(ctx: &DeviceContext) -> Result<ResetOutcome, FatalError> {
    let timing = &ctx.timing;
    for held in 0..timing.reset_hold_polls {
        if !ctx.controller.reset_asserted()? {
            debug!("Reset released after {} polls", held);
            return Ok(ResetOutcome::Aborted);
        }
        sleep(timing.reset_poll()).await;
    }

    warn!("Reset held, clearing configuration");
    persist_flags(
        &ctx.store,
        &[(CONFIGURED_KEY, false), (PROVISIONED_KEY, false)],
    )
    .await?;
    ctx.lifecycle.request_restart(RestartReason::FactoryReset);
    Ok(ResetOutcome::FactoryReset)
}
