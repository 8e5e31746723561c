//! Node runtime
//!
//! [`DeviceContext`] is the state every task of a node shares: the channel
//! registry, the relay controller, the flag store and the uplink. [`boot`]
//! probes the hardware and builds it; [`leaf`] and [`root`] are the two
//! message loops.

pub mod leaf;
pub mod root;

use crate::config::{GpioConfig, TimingConfig};
use crate::device::{ChannelRegistry, DeviceId, HardwareAddress};
use crate::error::FatalError;
use crate::lifecycle::Lifecycle;
use crate::link::Uplink;
use crate::relay::{EventAggregator, PinBank, RelayController};
use crate::storage::SharedStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub struct DeviceContext {
    pub device_id: DeviceId,
    pub registry: Mutex<ChannelRegistry>,
    pub controller: RelayController,
    pub events: Arc<EventAggregator>,
    pub store: SharedStore,
    pub uplink: Arc<dyn Uplink>,
    pub lifecycle: Lifecycle,
    pub timing: TimingConfig,
}

impl DeviceContext {
    /// Sends the current commandable channel values upstream
    pub async fn emit_telemetry(&self) {
        let doc = self.registry.lock().await.to_telemetry_document();
        self.publish(&doc, "telemetry");
    }

    /// Sends the provisioning document upstream
    pub async fn announce(&self) {
        let doc = self.registry.lock().await.to_provisioning_document();
        self.publish(&doc, "announcement");
    }

    fn publish(&self, doc: &Value, what: &str) {
        let bytes = match serde_json::to_vec(doc) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {}: {}", what, e);
                return;
            }
        };
        match self.uplink.publish(&bytes) {
            Ok(()) => debug!("Sent {} ({} bytes)", what, bytes.len()),
            Err(e) => warn!("Failed to send {}: {}", what, e),
        }
    }

    /// Drives the relays named in `channels` and mirrors the ports into the
    /// registry. Returns how many channels were applied.
    pub async fn apply_channels(&self, channels: &Map<String, Value>) -> usize {
        let applied = self.controller.apply_command(channels).await;
        self.sync_registry().await;
        applied.len()
    }

    /// Copies the current state of every populated port into the registry.
    ///
    /// Ports are read after the registry lock is taken, so whichever sync runs
    /// last writes the latest relay state, whatever order the button and
    /// command paths changed the ports in.
    pub async fn sync_registry(&self) {
        let mut registry = self.registry.lock().await;
        for port in self.controller.ports().await {
            let Some(on) = port.state().as_bool() else {
                continue;
            };
            if let Err(e) = registry.set_value(port.channel(), on) {
                debug!("Registry rejected {}: {}", port.channel(), e);
            }
        }
    }
}

/// Inputs to [`boot`]
pub struct NodeParts {
    pub device_name: String,
    pub address: HardwareAddress,
    pub board: Arc<dyn PinBank>,
    pub gpio: GpioConfig,
    pub timing: TimingConfig,
    pub store: SharedStore,
    pub uplink: Arc<dyn Uplink>,
    pub lifecycle: Lifecycle,
}

/// Probes the relay ports and builds the shared context
pub async fn boot(parts: NodeParts) -> Result<Arc<DeviceContext>, FatalError> {
    let mut registry = ChannelRegistry::create(&parts.device_name, &parts.address)?;
    let controller = RelayController::new(parts.board, &parts.gpio.ports, parts.gpio.reset_pin)?;
    let events = Arc::new(EventAggregator::new());

    let populated = controller.detect(&events, parts.gpio.settle()).await?;
    controller.register_channels(&mut registry).await?;
    info!(
        "Device {} up, {} of {} ports populated",
        registry.device_id(),
        populated,
        parts.gpio.ports.len()
    );
    debug!("{}", registry);

    Ok(Arc::new(DeviceContext {
        device_id: registry.device_id().clone(),
        registry: Mutex::new(registry),
        controller,
        events,
        store: parts.store,
        uplink: parts.uplink,
        lifecycle: parts.lifecycle,
        timing: parts.timing,
    }))
}
