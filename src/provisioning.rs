//! Provisioning handshake
//!
//! A fresh node announces its channel layout upstream every
//! `announce_secs` until a controller claims it with a provision directive.
//! The claim is persisted, so later boots go straight to the provisioned
//! state. Only a factory reset clears it again.

use crate::device::DeviceId;
use crate::error::FatalError;
use crate::lifecycle::{Lifecycle, RestartReason};
use crate::node::DeviceContext;
use crate::storage::{persist_flags, read_flag, SharedStore, CONFIGURED_KEY, PROVISIONED_KEY};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[state]
#[derive(Debug, Clone)]
pub enum ProvisionState {
    Unprovisioned, // Announcing, commands dropped
    Provisioned,   // Claimed by a controller
}

#[machine]
pub struct Handshake<S: ProvisionState> {
    device_id: DeviceId,
    store: SharedStore,
    announcer: CancellationToken,
}

impl<S: ProvisionState> Handshake<S> {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Whether a provision directive for `target` concerns this node. On the
    /// mesh a directive without a `deviceID` does; the root never passes one.
    pub fn accepts(&self, target: Option<&str>) -> bool {
        target.map_or(true, |id| self.device_id.matches(id))
    }
}

impl Handshake<Unprovisioned> {
    pub fn create(device_id: DeviceId, store: SharedStore) -> Self {
        Self::new(device_id, store, CancellationToken::new())
    }

    /// Token that stops the announce loop once the node is claimed
    pub fn announcer_token(&self) -> CancellationToken {
        self.announcer.clone()
    }

    /// Persists the claim and stops announcing. A failed write is fatal.
    pub async fn claim(self) -> Result<Handshake<Provisioned>, FatalError> {
        persist_flags(&self.store, &[(PROVISIONED_KEY, true)]).await?;
        self.announcer.cancel();
        info!("Device {} provisioned", self.device_id);
        Ok(self.transition())
    }
}

impl Handshake<Provisioned> {}

/// Handshake in whichever state the persisted flag says
pub enum Provisioning {
    Unprovisioned(Handshake<Unprovisioned>),
    Provisioned(Handshake<Provisioned>),
}

impl Provisioning {
    pub async fn resume(device_id: DeviceId, store: SharedStore) -> Self {
        let handshake = Handshake::create(device_id, store.clone());
        if read_flag(&store, PROVISIONED_KEY).await {
            info!("Device {} already provisioned", handshake.device_id);
            handshake.announcer.cancel();
            Provisioning::Provisioned(handshake.transition())
        } else {
            info!("Device {} waiting to be provisioned", handshake.device_id);
            Provisioning::Unprovisioned(handshake)
        }
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(self, Provisioning::Provisioned(_))
    }

    /// Claims the node if it is not claimed yet; repeated claims are no-ops
    pub async fn claim(self) -> Result<Self, FatalError> {
        match self {
            Provisioning::Unprovisioned(handshake) => {
                Ok(Provisioning::Provisioned(handshake.claim().await?))
            }
            provisioned => {
                debug!("Provision directive ignored, already provisioned");
                Ok(provisioned)
            }
        }
    }

    /// Announce token while unprovisioned
    pub fn announcer_token(&self) -> Option<CancellationToken> {
        match self {
            Provisioning::Unprovisioned(h) => Some(h.announcer_token()),
            Provisioning::Provisioned(_) => None,
        }
    }
}

/// Sends the provisioning document right away and then every `period` until
/// `token` is cancelled.
pub fn spawn_announcer(
    ctx: Arc<DeviceContext>,
    token: CancellationToken,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Announce loop stopped");
                    break;
                }
                _ = ticker.tick() => ctx.announce().await,
            }
        }
    })
}

/// Records the first successful network join and asks for a restart.
/// Returns whether this was the first join.
pub async fn confirm_network_join(
    store: &SharedStore,
    lifecycle: &Lifecycle,
) -> Result<bool, FatalError> {
    if read_flag(store, CONFIGURED_KEY).await {
        return Ok(false);
    }
    persist_flags(store, &[(CONFIGURED_KEY, true)]).await?;
    info!("Network join recorded");
    lifecycle.request_restart(RestartReason::NetworkConfigured);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HardwareAddress;
    use crate::node::testing::{harness, ADDRESS};
    use crate::storage::memory::MemoryFlagStore;
    use tokio::sync::Mutex;

    fn device_id() -> DeviceId {
        DeviceId::from(HardwareAddress::new(ADDRESS))
    }

    #[tokio::test]
    async fn claim_persists_and_stops_announcing() {
        let memory = Arc::new(Mutex::new(MemoryFlagStore::default()));
        let store: SharedStore = memory.clone();

        let provisioning = Provisioning::resume(device_id(), store.clone()).await;
        let token = provisioning.announcer_token().unwrap();
        assert!(!provisioning.is_provisioned());

        let provisioning = provisioning.claim().await.unwrap();
        assert!(provisioning.is_provisioned());
        assert!(token.is_cancelled());
        assert_eq!(memory.lock().await.committed(PROVISIONED_KEY), Some(true));

        let again = provisioning.claim().await.unwrap();
        assert!(again.is_provisioned());
        assert_eq!(memory.lock().await.commits, 1);
    }

    #[tokio::test]
    async fn persisted_flag_skips_handshake() {
        let store: SharedStore = Arc::new(Mutex::new(MemoryFlagStore::with_flags(&[(
            PROVISIONED_KEY,
            true,
        )])));
        let provisioning = Provisioning::resume(device_id(), store).await;
        assert!(provisioning.is_provisioned());
        assert!(provisioning.announcer_token().is_none());
    }

    #[tokio::test]
    async fn failed_claim_is_fatal() {
        let mut memory = MemoryFlagStore::default();
        memory.fail_commits = true;
        let store: SharedStore = Arc::new(Mutex::new(memory));

        let handshake = Handshake::create(device_id(), store);
        assert!(matches!(handshake.claim().await, Err(FatalError::Store(_))));
    }

    #[test]
    fn accepts_own_or_missing_id() {
        let store: SharedStore = Arc::new(Mutex::new(MemoryFlagStore::default()));
        let handshake = Handshake::create(device_id(), store);
        assert!(handshake.accepts(None));
        assert!(handshake.accepts(Some("240ac4000001")));
        assert!(!handshake.accepts(Some("240AC4000002")));
    }

    #[tokio::test]
    async fn first_join_restarts_once() {
        let memory = Arc::new(Mutex::new(MemoryFlagStore::default()));
        let store: SharedStore = memory.clone();
        let (lifecycle, mut restarts) = Lifecycle::new();

        assert!(confirm_network_join(&store, &lifecycle).await.unwrap());
        assert_eq!(restarts.try_recv().unwrap(), RestartReason::NetworkConfigured);
        assert_eq!(memory.lock().await.committed(CONFIGURED_KEY), Some(true));

        assert!(!confirm_network_join(&store, &lifecycle).await.unwrap());
        assert!(restarts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn announcer_repeats_until_cancelled() {
        let h = harness(&[17], &[]).await;
        let token = CancellationToken::new();
        let task = spawn_announcer(h.ctx.clone(), token.clone(), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let docs = h.uplink.documents();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["action"], "provision");
        assert_eq!(docs[0]["deviceID"], "240AC4000001");

        token.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.uplink.documents().len(), 3);
    }
}
