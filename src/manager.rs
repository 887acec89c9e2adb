use std::collections::HashMap;

use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::device::{DeviceDescriptor, NotifyingDevice};
use crate::driver::{self, Driver, DriverEvent};
use crate::messages::{MenuResponse, PlatformMessage};
use crate::mqtt::MqttClient;

/// Writes queued per device before new ones are dropped.
const WRITE_QUEUE: usize = 32;

/// Something the manager owes the platform link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Announcement(MenuResponse),
    Register(DeviceDescriptor),
    Reply { id: String, response: MenuResponse },
}

/// Routing entry for one registered device.
struct Route {
    writes: mpsc::Sender<String>,
    writer: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

pub struct Manager {
    driver: Driver,
    mqtt_client: MqttClient,
    /// Live device per guid; a new registration replaces the old entry.
    routes: HashMap<String, Route>,
}

impl Manager {
    pub fn new(driver: Driver, mqtt_client: MqttClient) -> Self {
        Manager {
            driver,
            mqtt_client,
            routes: HashMap::new(),
        }
    }

    pub async fn run_loop(
        mut self,
        mut mqtt_event_loop: rumqttc::EventLoop,
    ) -> Result<(), rumqttc::ClientError> {
        let (tx, mut rx) = broadcast::channel(32);
        let mut driver_events = self.driver.subscribe();

        // Poll the broker connection; ConnAck surfaces as PlatformMessage::Connected
        let link = self.mqtt_client.clone();
        tokio::task::spawn(async move {
            link.event_loop(&mut mqtt_event_loop, tx).await;
        });

        loop {
            let outbound = tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(msg) => self.handle_platform(msg).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Dropped {} platform messages", n);
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Platform link closed");
                        break;
                    }
                },
                event = driver_events.recv() => match event {
                    Ok(event) => Some(self.handle_driver_event(event)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Dropped {} driver events", n);
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            };

            if let Some(outbound) = outbound {
                self.publish(outbound).await;
            }
        }

        self.shutdown().await;
        self.mqtt_client.disconnect().await?;

        Ok(())
    }

    async fn publish(&self, outbound: Outbound) {
        let result = match &outbound {
            Outbound::Announcement(announcement) => self.mqtt_client.announce(announcement).await,
            Outbound::Register(descriptor) => self.mqtt_client.register(descriptor).await,
            Outbound::Reply { id, response } => self.mqtt_client.reply(id, response).await,
        };
        if let Err(err) = result {
            error!("Error publishing {:?}: {:?}", outbound, err);
        }
    }

    async fn handle_platform(&self, msg: PlatformMessage) -> Option<Outbound> {
        match msg {
            PlatformMessage::Connected => {
                self.driver.on_connected().await;
                None
            }
            PlatformMessage::Config { id, rpc } => {
                debug!("Config request {}: {:?}", id, rpc);
                let response = self.driver.config(rpc).await;
                Some(Outbound::Reply { id, response })
            }
            PlatformMessage::MalformedConfig { id, reason } => Some(Outbound::Reply {
                id,
                response: driver::malformed(&reason),
            }),
            PlatformMessage::DeviceWrite { guid, payload } => {
                let Some(route) = self.routes.get(&guid) else {
                    warn!("Write for unknown device {}", guid);
                    return None;
                };
                // Never block the event path on a slow send
                if let Err(err) = route.writes.try_send(payload) {
                    warn!("Dropping write for {}: {}", guid, err);
                }
                None
            }
        }
    }

    fn handle_driver_event(&mut self, event: DriverEvent) -> Outbound {
        match event {
            DriverEvent::Announcement(announcement) => Outbound::Announcement(announcement),
            DriverEvent::Register(device) => {
                let descriptor = device.descriptor(self.mqtt_client.node_id());
                let guid = descriptor.guid.clone();
                let (writes, writer) = spawn_writer(device.clone(), guid.clone());
                let route = Route {
                    writes,
                    writer,
                    forwarder: self.forward_data(&device, guid.clone()),
                };
                if let Some(old) = self.routes.insert(guid.clone(), route) {
                    debug!("Replacing device {}", guid);
                    // Queued writes on the old device still drain; its echoes stop here
                    old.forwarder.abort();
                }
                Outbound::Register(descriptor)
            }
        }
    }

    /// Echoes device data back to the platform until the route is replaced.
    fn forward_data(&self, device: &NotifyingDevice, guid: String) -> JoinHandle<()> {
        let mut data = device.subscribe();
        let link = self.mqtt_client.clone();
        tokio::task::spawn(async move {
            loop {
                match data.recv().await {
                    Ok(payload) => {
                        if let Err(err) = link.publish_data(&guid, payload).await {
                            error!("Error publishing data for {}: {:?}", guid, err);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Dropped {} data events for {}", n, guid);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stops forwarding and lets every queued write finish.
    async fn shutdown(&mut self) {
        for (guid, route) in self.routes.drain() {
            route.forwarder.abort();
            drop(route.writes);
            if let Err(err) = route.writer.await {
                error!("Writer for {} failed: {:?}", guid, err);
            }
        }
    }
}

/// Sends a device's notifications one at a time, in arrival order.
fn spawn_writer(device: NotifyingDevice, guid: String) -> (mpsc::Sender<String>, JoinHandle<()>) {
    let (writes, mut queue) = mpsc::channel::<String>(WRITE_QUEUE);
    let writer = tokio::task::spawn(async move {
        while let Some(payload) = queue.recv().await {
            match device.write(&payload).await {
                Ok(()) => debug!("Notification sent for {}", guid),
                Err(err) => error!("Error sending notification for {}: {}", guid, err),
            }
        }
        debug!("Writer for {} stopped", guid);
    });
    (writes, writer)
}
