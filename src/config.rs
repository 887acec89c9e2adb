use std::path::PathBuf;

use serde_derive::Deserialize;

pub const DEFAULT_PUSHOVER_URL: &str = "https://api.pushover.net";
pub const DEFAULT_TITLE: &str = "Ninjablocks";

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub pushover: Option<PushoverConfig>,
    pub state: Option<StateConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Node id, also used as the MQTT client id
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PushoverConfig {
    pub api_url: Option<String>,
    pub title: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
}

impl AppConfig {
    pub fn pushover(&self) -> PushoverConfig {
        self.pushover.clone().unwrap_or_default()
    }

    pub fn state_path(&self) -> PathBuf {
        self.state
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from("pushover-state.json"))
    }
}
