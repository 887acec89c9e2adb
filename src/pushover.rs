//! Minimal Pushover message API client.

use std::time::Duration;

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::config::{self, PushoverConfig};
use crate::store::Credentials;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("pushover request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pushover rejected message ({status}): {}", .errors.join(", "))]
    Rejected { status: u16, errors: Vec<String> },
}

/// Shared HTTP handle; cheap to clone.
#[derive(Debug, Clone)]
pub struct PushoverApi {
    http: reqwest::Client,
    base_url: String,
    title: String,
}

#[derive(Serialize)]
struct MessageForm<'a> {
    token: &'a str,
    user: &'a str,
    title: &'a str,
    message: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct MessageReply {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    errors: Vec<String>,
}

impl PushoverApi {
    pub fn new(config: &PushoverConfig) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.unwrap_or(10)))
            .build()?;
        Ok(PushoverApi {
            http,
            base_url: config
                .api_url
                .clone()
                .unwrap_or(config::DEFAULT_PUSHOVER_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            title: config.title.clone().unwrap_or(config::DEFAULT_TITLE.to_string()),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn client<'a>(&'a self, credentials: &'a Credentials) -> PushoverClient<'a> {
        PushoverClient {
            api: self,
            credentials,
        }
    }
}

/// Client scoped to one token/user pair.
pub struct PushoverClient<'a> {
    api: &'a PushoverApi,
    credentials: &'a Credentials,
}

impl PushoverClient<'_> {
    pub async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let form = MessageForm {
            token: &self.credentials.token_key,
            user: &self.credentials.user_key,
            title,
            message,
        };
        let response = self
            .api
            .http
            .post(format!("{}/1/messages.json", self.api.base_url))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        // Error bodies are not always JSON, so a parse failure is not fatal here
        let reply: MessageReply = response.json().await.unwrap_or_default();
        debug!("Pushover replied {} (status field {})", status, reply.status);

        if status.is_success() && reply.status == 1 {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                errors: reply.errors,
            })
        }
    }
}
