use super::{Destination, LinkError, MeshTransport, Uplink};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Uplink that keeps every published document
#[derive(Default)]
pub struct RecordingUplink {
    published: Mutex<Vec<Vec<u8>>>,
    pub fail: AtomicBool,
}

impl RecordingUplink {
    pub fn documents(&self) -> Vec<Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
            .collect()
    }

    pub fn raw(&self) -> Vec<Vec<u8>> {
        self.published.lock().unwrap().clone()
    }
}

impl Uplink for RecordingUplink {
    fn publish(&self, payload: &[u8]) -> Result<(), LinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LinkError::Publish("injected failure".into()));
        }
        self.published.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMesh {
    sent: Mutex<Vec<(Destination, Vec<u8>)>>,
}

impl RecordingMesh {
    pub fn sent(&self) -> Vec<(Destination, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

impl MeshTransport for RecordingMesh {
    fn send(&self, to: Destination, payload: &[u8]) -> Result<(), LinkError> {
        self.sent.lock().unwrap().push((to, payload.to_vec()));
        Ok(())
    }
}
