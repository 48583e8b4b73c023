//! Event payloads that cross the broker

use serde::{Deserialize, Serialize};

/// Emitted on the `app` source when a setting is written
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingChange {
    pub key: String,
    pub value: serde_json::Value,
}

/// Lifecycle state of the optional game-connection sub-service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disabled,
    Connecting,
    Connected,
    Disconnected,
}

/// Status report from the game-connection sub-service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ConnectionStatus {
    pub fn disabled() -> Self {
        Self {
            state: ConnectionState::Disabled,
            detail: None,
        }
    }

    pub fn connected() -> Self {
        Self {
            state: ConnectionState::Connected,
            detail: None,
        }
    }

    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            detail: Some(detail.into()),
        }
    }
}
