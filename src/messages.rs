use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

/// A single unit of UI content rendered by the platform.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Heading {
        text: String,
    },
    Paragraph {
        text: String,
    },
    Submit {
        name: String,
        rpc_method: String,
    },
    InputFieldText {
        field_name: String,
        value: String,
        label: String,
        placeholder: String,
        required: bool,
    },
    Close {
        text: String,
    },
}

impl ContentBlock {
    pub fn heading(text: impl Into<String>) -> Self {
        ContentBlock::Heading { text: text.into() }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        ContentBlock::Paragraph { text: text.into() }
    }

    pub fn submit(name: impl Into<String>, method: RpcMethod) -> Self {
        ContentBlock::Submit {
            name: name.into(),
            rpc_method: method.to_string(),
        }
    }

    pub fn close(text: impl Into<String>) -> Self {
        ContentBlock::Close { text: text.into() }
    }
}

/// Menu or announcement content sent back to the platform.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MenuResponse {
    pub contents: Vec<ContentBlock>,
}

impl MenuResponse {
    pub fn new(contents: Vec<ContentBlock>) -> Self {
        MenuResponse { contents }
    }
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl RpcRequest {
    #[cfg(test)]
    pub fn new(method: impl Into<String>) -> Self {
        RpcRequest {
            method: method.into(),
            params: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcMethod {
    AddApiKey,
    AddKeys,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsupportedMethod(pub String);

impl FromStr for RpcMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "addAPIKey" => Ok(RpcMethod::AddApiKey),
            "addKeys" => Ok(RpcMethod::AddKeys),
            other => Err(UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcMethod::AddApiKey => f.write_str("addAPIKey"),
            RpcMethod::AddKeys => f.write_str("addKeys"),
        }
    }
}

/// Stimuli arriving from the platform link.
#[derive(Clone, Debug)]
pub enum PlatformMessage {
    Connected,
    Config {
        id: String,
        rpc: Option<RpcRequest>,
    },
    /// A config request whose `rpc` body could not be decoded; still owed a reply.
    MalformedConfig {
        id: String,
        reason: String,
    },
    DeviceWrite {
        guid: String,
        payload: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_block_wire_format() {
        let block = ContentBlock::InputFieldText {
            field_name: "token_key".to_string(),
            value: String::new(),
            label: "Token key:".to_string(),
            placeholder: "Token key".to_string(),
            required: true,
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "input_field_text");
        assert_eq!(json["field_name"], "token_key");
        assert_eq!(json["required"], true);

        let submit = serde_json::to_value(ContentBlock::submit("Add", RpcMethod::AddKeys)).unwrap();
        assert_eq!(
            submit,
            serde_json::json!({"type": "submit", "name": "Add", "rpc_method": "addKeys"})
        );
    }

    #[test]
    fn test_rpc_method_parse() {
        assert_eq!("addAPIKey".parse::<RpcMethod>(), Ok(RpcMethod::AddApiKey));
        assert_eq!("addKeys".parse::<RpcMethod>(), Ok(RpcMethod::AddKeys));
        assert_eq!(
            "addkeys".parse::<RpcMethod>(),
            Err(UnsupportedMethod("addkeys".to_string()))
        );
    }

    #[test]
    fn test_rpc_request_without_params() {
        let rpc: RpcRequest = serde_json::from_str(r#"{"method": "addAPIKey"}"#).unwrap();
        assert_eq!(rpc.method, "addAPIKey");
        assert!(rpc.params.is_empty());
        assert_eq!(rpc.param("token_key"), None);
    }
}
