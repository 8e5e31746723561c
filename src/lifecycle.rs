//! Restart requests
//!
//! Nothing in the node restarts itself. Components that need a fresh boot
//! (factory reset, first network join) send a request here; `main` receives
//! it, logs the reason and exits with [`RESTART_EXIT_CODE`]. The exit is a
//! failure status so a supervisor set to restart on failure (systemd
//! `Restart=on-failure`) starts the daemon again.

use std::fmt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Exit status of a requested restart (`EX_TEMPFAIL`)
pub const RESTART_EXIT_CODE: u8 = 75;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartReason {
    FactoryReset,
    NetworkConfigured,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::FactoryReset => f.write_str("factory reset"),
            RestartReason::NetworkConfigured => f.write_str("network configured"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Lifecycle {
    tx: mpsc::UnboundedSender<RestartReason>,
}

impl Lifecycle {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RestartReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn request_restart(&self, reason: RestartReason) {
        info!("Restart requested: {}", reason);
        if self.tx.send(reason).is_err() {
            warn!("Restart receiver gone, request for {} dropped", reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_exit_is_a_failure_status() {
        assert_ne!(RESTART_EXIT_CODE, 0);
    }

    #[tokio::test]
    async fn requests_reach_the_receiver() {
        let (lifecycle, mut rx) = Lifecycle::new();
        lifecycle.clone().request_restart(RestartReason::FactoryReset);
        assert_eq!(rx.recv().await, Some(RestartReason::FactoryReset));

        drop(rx);
        lifecycle.request_restart(RestartReason::NetworkConfigured);
    }
}
