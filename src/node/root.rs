//! Root router
//!
//! The root is a node in its own right and also the gateway between broker and
//! mesh. Broker directives addressed to the root are applied locally; the rest
//! go down to the addressed leaf. Whatever arrives from the mesh is relayed to
//! the broker untouched.

use super::DeviceContext;
use crate::device::HardwareAddress;
use crate::error::FatalError;
use crate::link::{Destination, MeshFrame, MeshTransport};
use crate::protocol::{provision_directive, Directive};
use crate::provisioning::Provisioning;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct RootInbound {
    /// Payloads from the broker down topic
    pub broker: mpsc::Receiver<Vec<u8>>,
    pub mesh: mpsc::Receiver<MeshFrame>,
}

pub async fn run_root(
    ctx: Arc<DeviceContext>,
    mesh: Arc<dyn MeshTransport>,
    mut inbound: RootInbound,
    mut provisioning: Provisioning,
) -> Result<(), FatalError> {
    info!("Root router running");
    loop {
        tokio::select! {
            message = inbound.broker.recv() => {
                let Some(bytes) = message else {
                    return Err(FatalError::LinkClosed("broker"));
                };
                provisioning = route_directive(&ctx, mesh.as_ref(), provisioning, &bytes).await?;
            }
            frame = inbound.mesh.recv() => {
                let Some(frame) = frame else {
                    return Err(FatalError::LinkClosed("mesh"));
                };
                relay_upstream(&ctx, &frame);
            }
        }
    }
}

async fn route_directive(
    ctx: &DeviceContext,
    mesh: &dyn MeshTransport,
    provisioning: Provisioning,
    bytes: &[u8],
) -> Result<Provisioning, FatalError> {
    let directive = match Directive::parse(bytes) {
        Ok(directive) => directive,
        Err(e) => {
            warn!("Dropping broker message: {}", e);
            return Ok(provisioning);
        }
    };

    match directive {
        Directive::Provision { device_id: None } => {
            warn!("Dropping provision directive without deviceID");
            Ok(provisioning)
        }
        Directive::Provision {
            device_id: Some(id),
        } => {
            if ctx.device_id.matches(&id) {
                return provisioning.claim().await;
            }
            forward(mesh, &id, &provision_directive(&id));
            Ok(provisioning)
        }
        Directive::Command { device_id, channels } => {
            if !provisioning.is_provisioned() {
                debug!("Not provisioned, command for {} dropped", device_id);
            } else if ctx.device_id.matches(&device_id) {
                apply_locally(ctx, &channels).await;
            } else {
                forward(mesh, &device_id, &Value::Object(channels));
            }
            Ok(provisioning)
        }
    }
}

async fn apply_locally(ctx: &DeviceContext, channels: &Map<String, Value>) {
    let applied = ctx.apply_channels(channels).await;
    debug!("Applied {} of {} channels locally", applied, channels.len());
    ctx.emit_telemetry().await;
}

fn forward(mesh: &dyn MeshTransport, device_id: &str, doc: &Value) {
    let address = match HardwareAddress::from_device_id(device_id) {
        Ok(address) => address,
        Err(e) => {
            warn!("Cannot route to '{}': {}", device_id, e);
            return;
        }
    };
    let payload = match serde_json::to_vec(doc) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode message for {}: {}", device_id, e);
            return;
        }
    };
    match mesh.send(Destination::Node(address), &payload) {
        Ok(()) => debug!("Forwarded {} bytes to {}", payload.len(), address),
        Err(e) => warn!("Forward to {} failed: {}", device_id, e),
    }
}

fn relay_upstream(ctx: &DeviceContext, frame: &MeshFrame) {
    match ctx.uplink.publish(&frame.payload) {
        Ok(()) => debug!("Relayed {} bytes from {}", frame.payload.len(), frame.source),
        Err(e) => warn!("Relay from {} failed: {}", frame.source, e),
    }
}
