use log::{debug, info};
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::pushover::{NotifyError, PushoverApi};
use crate::store::Credentials;

/// Channel, vendor and device-class ids the platform routes on.
/// Vendor 0 is the Ninja Blocks device list, 2000 its generic sandbox device.
pub const CHANNEL: &str = "0";
pub const VENDOR: u32 = 0;
pub const DEVICE_CLASS: u32 = 2000;
pub const NAME: &str = "Pushover";

/// Actuator that turns every write into one push notification.
#[derive(Debug, Clone)]
pub struct NotifyingDevice {
    credentials: Credentials,
    api: PushoverApi,
    data_tx: broadcast::Sender<String>,
}

/// What the platform is told about a registered device.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub guid: String,
    #[serde(rename = "G")]
    pub channel: String,
    #[serde(rename = "V")]
    pub vendor: u32,
    #[serde(rename = "D")]
    pub device_class: u32,
    pub name: String,
    pub readable: bool,
    pub writable: bool,
}

impl NotifyingDevice {
    pub fn new(credentials: Credentials, api: PushoverApi) -> Self {
        let (data_tx, _) = broadcast::channel(16);
        NotifyingDevice {
            credentials,
            api,
            data_tx,
        }
    }

    #[cfg(test)]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn readable(&self) -> bool {
        true
    }

    pub fn writable(&self) -> bool {
        true
    }

    pub fn guid(&self, node_id: &str) -> String {
        format!("{}_{}_{}_{}", node_id, CHANNEL, VENDOR, DEVICE_CLASS)
    }

    pub fn descriptor(&self, node_id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            guid: self.guid(node_id),
            channel: CHANNEL.to_string(),
            vendor: VENDOR,
            device_class: DEVICE_CLASS,
            name: NAME.to_string(),
            readable: self.readable(),
            writable: self.writable(),
        }
    }

    /// Receives every payload written to this device.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.data_tx.subscribe()
    }

    pub async fn write(&self, payload: &str) -> Result<(), NotifyError> {
        if self.data_tx.send(payload.to_string()).is_err() {
            debug!("No data listeners for {}", NAME);
        }

        info!("Sending pushover notification");
        self.api
            .client(&self.credentials)
            .send(self.api.title(), payload)
            .await
    }
}
