//! Leaf message loop
//!
//! Until claimed, a leaf listens only for a provision directive addressed to
//! it (or to nobody in particular). Afterwards every channel map addressed to
//! it drives the relays, and every JSON object it receives is answered with
//! one telemetry document.

use super::DeviceContext;
use crate::error::FatalError;
use crate::link::MeshFrame;
use crate::protocol::LeafMessage;
use crate::provisioning::{Handshake, Provisioned, Provisioning, Unprovisioned};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn run_leaf(
    ctx: Arc<DeviceContext>,
    mut inbound: mpsc::Receiver<MeshFrame>,
    provisioning: Provisioning,
) -> Result<(), FatalError> {
    let _handshake = match provisioning {
        Provisioning::Provisioned(handshake) => handshake,
        Provisioning::Unprovisioned(handshake) => await_claim(&mut inbound, handshake).await?,
    };
    info!("Leaf accepting commands");

    while let Some(frame) = inbound.recv().await {
        handle_frame(&ctx, &frame).await;
    }
    Err(FatalError::LinkClosed("mesh"))
}

async fn await_claim(
    inbound: &mut mpsc::Receiver<MeshFrame>,
    handshake: Handshake<Unprovisioned>,
) -> Result<Handshake<Provisioned>, FatalError> {
    while let Some(frame) = inbound.recv().await {
        match LeafMessage::parse(&frame.payload) {
            Ok(LeafMessage::Provision { device_id }) if handshake.accepts(device_id.as_deref()) => {
                return handshake.claim().await;
            }
            Ok(LeafMessage::Provision { device_id }) => {
                debug!("Provision directive for {:?} ignored", device_id);
            }
            Ok(LeafMessage::Channels { .. }) => debug!("Not provisioned, command dropped"),
            Ok(LeafMessage::Unhandled(reason)) => debug!("Not provisioned, dropping: {}", reason),
            Err(e) => debug!("Dropping frame from {}: {}", frame.source, e),
        }
    }
    Err(FatalError::LinkClosed("mesh"))
}

async fn handle_frame(ctx: &DeviceContext, frame: &MeshFrame) {
    match LeafMessage::parse(&frame.payload) {
        Ok(LeafMessage::Channels {
            device_id: Some(id),
            ..
        }) if !ctx.device_id.matches(&id) => {
            debug!("Command for {} dropped", id);
        }
        Ok(LeafMessage::Channels { channels, .. }) => {
            let applied = ctx.apply_channels(&channels).await;
            debug!("Applied {} of {} channels", applied, channels.len());
        }
        Ok(LeafMessage::Provision { .. }) => debug!("Already provisioned"),
        Ok(LeafMessage::Unhandled(reason)) => debug!("Nothing to do: {}", reason),
        Err(e) => {
            warn!("Dropping frame from {}: {}", frame.source, e);
            return;
        }
    }
    ctx.emit_telemetry().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HardwareAddress;
    use crate::node::testing::{harness, Harness};
    use crate::relay::Level;
    use crate::storage::PROVISIONED_KEY;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::sleep;

    const ROOT: HardwareAddress = HardwareAddress::new([0x24, 0x0A, 0xC4, 0, 0, 0xFF]);

    fn frame(doc: serde_json::Value) -> MeshFrame {
        MeshFrame {
            source: ROOT,
            payload: serde_json::to_vec(&doc).unwrap(),
        }
    }

    async fn start(h: &Harness) -> (mpsc::Sender<MeshFrame>, tokio::task::JoinHandle<Result<(), FatalError>>) {
        let provisioning = Provisioning::resume(h.ctx.device_id.clone(), h.ctx.store.clone()).await;
        let (tx, rx) = mpsc::channel(8);
        (tx, tokio::spawn(run_leaf(h.ctx.clone(), rx, provisioning)))
    }

    #[tokio::test]
    async fn commands_before_claim_are_dropped() {
        let h = harness(&[17], &[]).await;
        let (tx, _task) = start(&h).await;

        tx.send(frame(json!({"relay_1": true}))).await.unwrap();
        tx.send(frame(json!({"action": "provision", "deviceID": "000000000000"})))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.board.level(16), Some(Level::Low));
        assert!(h.uplink.documents().is_empty());
        assert_eq!(h.store.lock().await.committed(PROVISIONED_KEY), None);

        tx.send(frame(json!({"action": "provision"}))).await.unwrap();
        tx.send(frame(json!({"relay_1": true}))).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.store.lock().await.committed(PROVISIONED_KEY), Some(true));
        assert_eq!(h.board.level(16), Some(Level::High));
    }

    #[tokio::test]
    async fn provisioned_leaf_answers_with_telemetry() {
        let h = harness(&[17, 23, 14], &[(PROVISIONED_KEY, true)]).await;
        let (tx, _task) = start(&h).await;

        tx.send(frame(json!({"relay_1": true, "relay_2": true, "relay_3": false})))
            .await
            .unwrap();
        tx.send(MeshFrame {
            source: ROOT,
            payload: b"[not an object".to_vec(),
        })
        .await
        .unwrap();
        tx.send(frame(json!({"action": "command", "deviceID": "240AC4000001", "channels": {"relay_5": true}})))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.board.level(18), Some(Level::Low));
        let docs = h.uplink.documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(
            docs[0]["channels"],
            json!({"relay_5": false, "relay_3": false, "relay_1": true})
        );
        assert_eq!(docs[1]["channels"]["relay_5"], true);
    }

    #[tokio::test]
    async fn closed_mesh_is_fatal() {
        let h = harness(&[17], &[(PROVISIONED_KEY, true)]).await;
        let (tx, task) = start(&h).await;
        drop(tx);
        assert!(matches!(
            task.await.unwrap(),
            Err(FatalError::LinkClosed("mesh"))
        ));
    }

    #[tokio::test]
    async fn commands_for_other_devices_are_not_applied() {
        let h = harness(&[17], &[(PROVISIONED_KEY, true)]).await;
        let (tx, _task) = start(&h).await;

        tx.send(frame(json!({"action": "command", "deviceID": "AABBCCDDEEFF", "channels": {"relay_1": true}})))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(h.board.level(16), Some(Level::Low));
        let docs = h.uplink.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["channels"]["relay_1"], false);
    }

    #[tokio::test]
    async fn every_object_is_answered_with_telemetry() {
        let h = harness(&[17], &[(PROVISIONED_KEY, true)]).await;
        let (tx, _task) = start(&h).await;

        tx.send(frame(json!({"action": "provision"}))).await.unwrap();
        tx.send(frame(json!({"action": "reboot"}))).await.unwrap();
        tx.send(frame(json!([1, 2]))).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let docs = h.uplink.documents();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|doc| doc["action"] == "telemetry"));
    }

    #[tokio::test]
    async fn failed_uplink_does_not_stop_the_loop() {
        let h = harness(&[17, 23], &[(PROVISIONED_KEY, true)]).await;
        let (tx, task) = start(&h).await;

        h.uplink.fail.store(true, Ordering::SeqCst);
        tx.send(frame(json!({"relay_1": true}))).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.board.level(16), Some(Level::High));
        assert!(h.uplink.documents().is_empty());

        h.uplink.fail.store(false, Ordering::SeqCst);
        tx.send(frame(json!({"relay_3": true}))).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert_eq!(h.board.level(22), Some(Level::High));
        let docs = h.uplink.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["channels"], json!({"relay_3": true, "relay_1": true}));
    }
}
