use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use serde_derive::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config;
use crate::device::DeviceDescriptor;
use crate::messages::{MenuResponse, PlatformMessage, RpcRequest};

/// Link to the hub platform over an MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    node_id: String,
    topic_path: String,
}

#[derive(Debug, Deserialize)]
struct ConfigRequest {
    id: String,
    #[serde(default)]
    rpc: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ConfigReply<'a> {
    id: &'a str,
    error: Option<String>,
    result: &'a MenuResponse,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let node_id = sanitize_name(
            config
                .publisher_id
                .as_deref()
                .unwrap_or("ninja-pushover"),
        );

        let mut mqttoptions = MqttOptions::new(
            node_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                node_id,
                topic_path: config.topic_path.clone().unwrap_or("ninja".to_string()),
            },
            eventloop,
        )
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn prefix(&self) -> String {
        format!("{}/{}", self.topic_path, self.node_id)
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        let prefix = self.prefix();
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(format!("{prefix}/config"), QoS::AtLeastOnce),
                SubscribeFilter::new(format!("{prefix}/devices/+/write"), QoS::AtLeastOnce),
            ])
            .await?;

        Ok(())
    }

    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<PlatformMessage>,
    ) {
        let prefix = self.prefix();
        loop {
            let message = match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);
                        parse_inbound(&prefix, &p.topic, &p.payload)
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                        None
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        info!("Connected to platform broker");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                        Some(PlatformMessage::Connected)
                    }
                    _ => None,
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    // rumqttc reconnects on the next poll
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    None
                }
            };

            if let Some(message) = message {
                if let Err(err) = tx.send(message) {
                    error!("Error forwarding platform message: {:?}", err);
                }
            }
        }
    }

    async fn publish_json<T: serde::Serialize>(
        &self,
        suffix: &str,
        value: &T,
    ) -> Result<(), rumqttc::ClientError> {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Error encoding {} payload: {:?}", suffix, err);
                return Ok(());
            }
        };
        self.client
            .publish(
                format!("{}/{}", self.prefix(), suffix),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await
    }

    pub async fn announce(&self, announcement: &MenuResponse) -> Result<(), rumqttc::ClientError> {
        info!("Sending announcement");
        self.publish_json("announcement", announcement).await
    }

    pub async fn register(&self, device: &DeviceDescriptor) -> Result<(), rumqttc::ClientError> {
        info!("Registering device {} ({})", device.guid, device.name);
        self.publish_json("register", device).await
    }

    pub async fn reply(&self, id: &str, result: &MenuResponse) -> Result<(), rumqttc::ClientError> {
        let reply = ConfigReply {
            id,
            error: None,
            result,
        };
        self.publish_json("config/reply", &reply).await
    }

    pub async fn publish_data(&self, guid: &str, data: String) -> Result<(), rumqttc::ClientError> {
        self.client
            .publish(
                format!("{}/devices/{}/data", self.prefix(), guid),
                QoS::AtMostOnce,
                false,
                data,
            )
            .await
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

/// Maps an inbound publish under `prefix` to a platform message.
fn parse_inbound(prefix: &str, topic: &str, payload: &[u8]) -> Option<PlatformMessage> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;

    if rest == "config" {
        // Without an id there is nowhere to send a reply
        let request = match serde_json::from_slice::<ConfigRequest>(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!("Dropping config request without a usable id: {}", err);
                return None;
            }
        };
        return Some(match request.rpc {
            None | Some(serde_json::Value::Null) => PlatformMessage::Config {
                id: request.id,
                rpc: None,
            },
            Some(rpc) => match serde_json::from_value::<RpcRequest>(rpc) {
                Ok(rpc) => PlatformMessage::Config {
                    id: request.id,
                    rpc: Some(rpc),
                },
                Err(err) => {
                    warn!("Malformed rpc in config request {}: {}", request.id, err);
                    PlatformMessage::MalformedConfig {
                        id: request.id,
                        reason: err.to_string(),
                    }
                }
            },
        });
    }

    let guid = rest.strip_prefix("devices/")?.strip_suffix("/write")?;
    if guid.is_empty() || guid.contains('/') {
        warn!("Ignoring write on unexpected topic {}", topic);
        return None;
    }
    let payload = match std::str::from_utf8(payload) {
        Ok(payload) => payload.to_string(),
        Err(err) => {
            warn!("Dropping non UTF-8 write for {}: {}", guid, err);
            return None;
        }
    };
    Some(PlatformMessage::DeviceWrite {
        guid: guid.to_string(),
        payload,
    })
}

fn sanitize_name(name: &str) -> String {
    // Keep topic-safe characters only
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "ninja/node1";

    #[test]
    fn test_sanitize_name() {
        let name = "Test's Node 123";
        let sanitized = sanitize_name(name);
        assert_eq!(sanitized, "test_s_node_123");
        assert_eq!(sanitize_name("ninja-pushover"), "ninja-pushover");
    }

    #[test]
    fn test_parse_config_request() {
        let payload = br#"{"id": "r1", "rpc": {"method": "addKeys", "params": {"token_key": "tok1", "user_key": "usr1"}}}"#;
        match parse_inbound(PREFIX, "ninja/node1/config", payload) {
            Some(PlatformMessage::Config { id, rpc: Some(rpc) }) => {
                assert_eq!(id, "r1");
                assert_eq!(rpc.method, "addKeys");
                assert_eq!(rpc.param("user_key"), Some("usr1"));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(matches!(
            parse_inbound(PREFIX, "ninja/node1/config", br#"{"id": "r2", "rpc": null}"#),
            Some(PlatformMessage::Config { rpc: None, .. })
        ));
        assert!(parse_inbound(PREFIX, "ninja/node1/config", b"{oops").is_none());
        assert!(parse_inbound(PREFIX, "ninja/node1/config", br#"{"rpc": null}"#).is_none());
    }

    #[test]
    fn test_parse_bad_rpc_keeps_id() {
        let bad_param = br#"{"id": "r1", "rpc": {"method": "addKeys", "params": {"token_key": 1, "user_key": "usr1"}}}"#;
        match parse_inbound(PREFIX, "ninja/node1/config", bad_param) {
            Some(PlatformMessage::MalformedConfig { id, reason }) => {
                assert_eq!(id, "r1");
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert!(matches!(
            parse_inbound(PREFIX, "ninja/node1/config", br#"{"id": "r2", "rpc": {}}"#),
            Some(PlatformMessage::MalformedConfig { id, .. }) if id == "r2"
        ));
        assert!(matches!(
            parse_inbound(PREFIX, "ninja/node1/config", br#"{"id": "r3"}"#),
            Some(PlatformMessage::Config { rpc: None, .. })
        ));
    }

    #[test]
    fn test_parse_device_write() {
        match parse_inbound(PREFIX, "ninja/node1/devices/node1_0_0_2000/write", b"hello") {
            Some(PlatformMessage::DeviceWrite { guid, payload }) => {
                assert_eq!(guid, "node1_0_0_2000");
                assert_eq!(payload, "hello");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_drops_non_utf8_write() {
        assert!(
            parse_inbound(PREFIX, "ninja/node1/devices/node1_0_0_2000/write", b"hi \xff").is_none()
        );
    }

    #[test]
    fn test_parse_ignores_foreign_topics() {
        assert!(parse_inbound(PREFIX, "ninja/other/config", b"{}").is_none());
        assert!(parse_inbound(PREFIX, "ninja/node1config", b"{}").is_none());
        assert!(parse_inbound(PREFIX, "ninja/node1/devices/x/data", b"hi").is_none());
        assert!(parse_inbound(PREFIX, "ninja/node1/devices//write", b"hi").is_none());
    }

    #[test]
    fn test_reply_shape() {
        let result = MenuResponse::default();
        let reply = ConfigReply {
            id: "r1",
            error: None,
            result: &result,
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"id": "r1", "error": null, "result": {"contents": []}})
        );
    }
}
