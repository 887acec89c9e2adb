use log::{error, info, warn};
use tokio::sync::{Mutex, broadcast};

use crate::device::NotifyingDevice;
use crate::messages::{ContentBlock, MenuResponse, RpcMethod, RpcRequest, UnsupportedMethod};
use crate::pushover::PushoverApi;
use crate::store::{ConfigStore, Configuration, Credentials};

pub const TOKEN_FIELD: &str = "token_key";
pub const USER_FIELD: &str = "user_key";

#[derive(Clone, Debug)]
pub enum DriverEvent {
    /// One-time greeting shown to the user.
    Announcement(MenuResponse),
    /// A device the platform should route writes to; replaces any earlier one.
    Register(NotifyingDevice),
}

/// Owns the persisted configuration and drives the setup menu.
pub struct Driver {
    config: Mutex<Configuration>,
    store: ConfigStore,
    api: PushoverApi,
    events: broadcast::Sender<DriverEvent>,
}

pub fn announcement() -> MenuResponse {
    MenuResponse::new(vec![
        ContentBlock::heading("Pushover Driver Loaded"),
        ContentBlock::paragraph(
            "The pushover driver has been loaded. You should not see this message again.",
        ),
    ])
}

fn top_menu() -> MenuResponse {
    MenuResponse::new(vec![ContentBlock::submit(
        "Add pushover API key.",
        RpcMethod::AddApiKey,
    )])
}

fn key_field(field_name: &str, label: &str) -> ContentBlock {
    ContentBlock::InputFieldText {
        field_name: field_name.to_string(),
        value: String::new(),
        label: format!("{label}:"),
        placeholder: label.to_string(),
        required: true,
    }
}

/// Fields always start empty so submitted keys are never sent back out.
fn add_key_prompt(problem: Option<&str>) -> MenuResponse {
    let mut contents = Vec::with_capacity(5);
    if let Some(problem) = problem {
        contents.push(ContentBlock::paragraph(problem));
    }
    contents.extend([
        ContentBlock::paragraph("Please enter your pushover user and token keys."),
        key_field(TOKEN_FIELD, "Token key"),
        key_field(USER_FIELD, "User key"),
        ContentBlock::submit("Add", RpcMethod::AddKeys),
    ]);
    MenuResponse::new(contents)
}

fn keys_saved() -> MenuResponse {
    MenuResponse::new(vec![
        ContentBlock::paragraph("Your api key has been saved."),
        ContentBlock::close("Close"),
    ])
}

fn unsupported(method: &str) -> MenuResponse {
    MenuResponse::new(vec![
        ContentBlock::paragraph(format!("Unsupported method: {method}")),
        ContentBlock::close("Close"),
    ])
}

/// Answer for a request whose rpc body could not be decoded.
pub fn malformed(reason: &str) -> MenuResponse {
    MenuResponse::new(vec![
        ContentBlock::paragraph(format!("Malformed request: {reason}")),
        ContentBlock::close("Close"),
    ])
}

impl Driver {
    pub fn new(config: Configuration, store: ConfigStore, api: PushoverApi) -> Self {
        let (events, _) = broadcast::channel(16);
        Driver {
            config: Mutex::new(config),
            store,
            api,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub async fn configuration(&self) -> Configuration {
        self.config.lock().await.clone()
    }

    pub async fn on_connected(&self) {
        let mut config = self.config.lock().await;

        if !config.has_sent_announcement {
            config.has_sent_announcement = true;
            self.persist(&config).await;
            self.emit(DriverEvent::Announcement(announcement()));
        }

        if let Some(credentials) = config.credentials.clone() {
            self.register(credentials);
        }
    }

    /// Answers one menu request. State comes from `request.method` alone,
    /// so a `None` request always lands on the top menu.
    pub async fn config(&self, request: Option<RpcRequest>) -> MenuResponse {
        let Some(rpc) = request else {
            return top_menu();
        };

        match rpc.method.parse::<RpcMethod>() {
            Ok(RpcMethod::AddApiKey) => add_key_prompt(None),
            Ok(RpcMethod::AddKeys) => self.submit_keys(&rpc).await,
            Err(UnsupportedMethod(method)) => {
                warn!("Unknown rpc method {:?}", method);
                unsupported(&method)
            }
        }
    }

    async fn submit_keys(&self, rpc: &RpcRequest) -> MenuResponse {
        let token = rpc.param(TOKEN_FIELD).unwrap_or_default().trim();
        let user = rpc.param(USER_FIELD).unwrap_or_default().trim();

        if token.is_empty() || user.is_empty() {
            info!("Rejecting pushover keys with a missing field");
            return add_key_prompt(Some("Both the token key and the user key are required."));
        }

        self.add_keys(Credentials {
            token_key: token.to_string(),
            user_key: user.to_string(),
        })
        .await;
        keys_saved()
    }

    /// Stores both keys in one step, persists them and registers a new device.
    pub async fn add_keys(&self, credentials: Credentials) {
        let mut config = self.config.lock().await;
        config.credentials = Some(credentials.clone());
        self.persist(&config).await;
        self.register(credentials);
    }

    fn register(&self, credentials: Credentials) {
        info!("Registering pushover device");
        self.emit(DriverEvent::Register(NotifyingDevice::new(
            credentials,
            self.api.clone(),
        )));
    }

    async fn persist(&self, config: &Configuration) {
        if let Err(err) = self.store.save(config).await {
            error!("Error saving driver state to {:?}: {:?}", self.store.path(), err);
        }
    }

    fn emit(&self, event: DriverEvent) {
        if self.events.send(event).is_err() {
            warn!("Driver event dropped, nobody is listening");
        }
    }
}
