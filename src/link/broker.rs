//! MQTT bridge of the root node
//!
//! The root publishes everything it relays upstream to `up/MAC/<id>` and takes
//! controller directives from `down/MAC/<id>`. The subscription is renewed on
//! every ConnAck since the broker may drop the session across reconnects.

use super::{LinkError, Uplink};
use crate::config::BrokerConfig;
use crate::device::DeviceId;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INBOUND_CAPACITY: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub up: String,
    pub down: String,
}

impl Topics {
    pub fn new(config: &BrokerConfig, id: &DeviceId) -> Self {
        Self {
            up: format!("{}/{}", config.up_prefix, id),
            down: format!("{}/{}", config.down_prefix, id),
        }
    }
}

pub struct BrokerUplink {
    client: AsyncClient,
    topic: String,
}

impl Uplink for BrokerUplink {
    fn publish(&self, payload: &[u8]) -> Result<(), LinkError> {
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| LinkError::Publish(e.to_string()))
    }
}

/// Everything the root needs from a running broker connection
pub struct BrokerLink {
    pub uplink: BrokerUplink,
    /// Payloads received on the down topic
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Fires once, on the first ConnAck
    pub joined: oneshot::Receiver<()>,
    pub task: JoinHandle<()>,
}

impl BrokerLink {
    /// Creates the client and spawns its event loop. Connecting happens in the
    /// background; failures are retried every `reconnect_delay_ms`.
    pub fn spawn(config: &BrokerConfig, id: &DeviceId) -> Self {
        let topics = Topics::new(config, id);
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("relaymesh-{}", id));

        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        let (client, eventloop) = AsyncClient::new(options, config.capacity);

        let (inbound_tx, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let (joined_tx, joined) = oneshot::channel();
        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            topics.down.clone(),
            inbound_tx,
            joined_tx,
            Duration::from_millis(config.reconnect_delay_ms),
        ));
        info!("Broker bridge {}:{} up={} down={}", config.host, config.port, topics.up, topics.down);

        Self {
            uplink: BrokerUplink {
                client,
                topic: topics.up,
            },
            inbound,
            joined,
            task,
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    down: String,
    sink: mpsc::Sender<Vec<u8>>,
    joined: oneshot::Sender<()>,
    reconnect_delay: Duration,
) {
    let mut joined = Some(joined);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic != down {
                    debug!("Ignoring publish on {}", publish.topic);
                    continue;
                }
                if sink.send(publish.payload.to_vec()).await.is_err() {
                    debug!("Broker consumer gone, stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Broker connected");
                if let Err(e) = client.try_subscribe(&down, QoS::AtMostOnce) {
                    error!("Subscribe to {} failed: {}", down, e);
                }
                if let Some(tx) = joined.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("Broker disconnected"),
            Ok(_) => {}
            Err(e) => {
                error!("Broker connection error: {}", e);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HardwareAddress;

    #[test]
    fn topics_carry_device_id() {
        let id = DeviceId::from(HardwareAddress::new([0x24, 0x0A, 0xC4, 0xA1, 0xB2, 0xC3]));
        let topics = Topics::new(&BrokerConfig::default(), &id);
        assert_eq!(topics.up, "up/MAC/240AC4A1B2C3");
        assert_eq!(topics.down, "down/MAC/240AC4A1B2C3");
    }
}
