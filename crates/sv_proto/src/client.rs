//! Protocol client interface.
//!
//! The messaging client itself is an external collaborator. We only need to
//! observe it: it tells us when its credentials changed and when its
//! connection opened or closed, and we can ask it to log out or drop its
//! transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::credentials::Credentials;

/// Receiver half handed out by [`ProtocolClient::subscribe`].
pub type EventStream = mpsc::UnboundedReceiver<ClientEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Why the transport went away, as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectReason {
    /// Protocol status code, e.g. 401 when the server rejected our credentials.
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

impl DisconnectReason {
    pub fn status(code: u16) -> Self {
        Self {
            status_code: Some(code),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Credentials were rejected: reconnecting with them is pointless.
    pub fn is_auth_rejected(&self, logout_codes: &[u16]) -> bool {
        self.status_code
            .is_some_and(|code| logout_codes.contains(&code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(rename = "connection")]
    pub state: ConnectionState,
    #[serde(default, rename = "lastDisconnect")]
    pub disconnect: Option<DisconnectReason>,
}

impl ConnectionUpdate {
    pub fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            disconnect: None,
        }
    }

    pub fn open() -> Self {
        Self {
            state: ConnectionState::Open,
            disconnect: None,
        }
    }

    pub fn close(reason: Option<DisconnectReason>) -> Self {
        Self {
            state: ConnectionState::Close,
            disconnect: reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The client rotated or added key material. Carries no payload; read
    /// [`ProtocolClient::current_credentials`] for the new state.
    CredentialsUpdated,
    ConnectionUpdate(ConnectionUpdate),
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Snapshot of the client's full credential set.
    fn current_credentials(&self) -> Credentials;

    /// Register for every event emitted after this call.
    fn subscribe(&self) -> EventStream;

    /// Ask the server to unlink this device.
    async fn logout(&self) -> anyhow::Result<()>;

    /// Forced teardown of the underlying transport.
    fn close_transport(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_code_based() {
        let codes = [401];
        assert!(DisconnectReason::status(401).is_auth_rejected(&codes));
        assert!(!DisconnectReason::status(428).is_auth_rejected(&codes));
        assert!(!DisconnectReason::default()
            .with_message("stream errored")
            .is_auth_rejected(&codes));
    }

    #[test]
    fn connection_update_uses_client_field_names() {
        let update: ConnectionUpdate = serde_json::from_str(
            r#"{"connection":"close","lastDisconnect":{"statusCode":401}}"#,
        )
        .unwrap();
        assert_eq!(update, ConnectionUpdate::close(Some(DisconnectReason::status(401))));

        let json = serde_json::to_value(ConnectionUpdate::open()).unwrap();
        assert_eq!(json["connection"], "open");
    }
}
