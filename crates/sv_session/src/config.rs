use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Tunables of the connection lifecycle. Every field has a default, so a
/// partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fixed delay before every reconnect and every retried write.
    pub reconnect_delay_ms: u64,
    /// Consecutive failed connection attempts tolerated before giving up.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Disconnect status codes that mean the credentials were rejected.
    pub logout_status_codes: Vec<u16>,
    /// Identical save errors in a row before the session is failed.
    pub max_identical_save_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: None,
            logout_status_codes: vec![401],
            max_identical_save_failures: 5,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SessionError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_identical_save_failures == 0 {
            return Err(SessionError::Config(
                "max_identical_save_failures must be at least 1".into(),
            ));
        }
        if let Some(code) = self
            .logout_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(SessionError::Config(format!(
                "logout status code {code} is not a valid status"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_keep_defaults() {
        let config = SessionConfig::from_json_str(r#"{"reconnect_delay_ms": 250}"#).unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.logout_status_codes, vec![401]);
        assert_eq!(config.max_identical_save_failures, 5);
        assert_eq!(config.max_reconnect_attempts, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"max_identical_save_failures": 0}"#),
            Err(SessionError::Config(_))
        ));
        assert!(SessionConfig::from_json_str(r#"{"logout_status_codes": [401, 9000]}"#).is_err());
        assert!(SessionConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, r#"{"max_reconnect_attempts": 3, "logout_status_codes": [401, 403]}"#)
            .unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.max_reconnect_attempts, Some(3));
        assert_eq!(config.logout_status_codes, vec![401, 403]);

        assert!(SessionConfig::load(dir.path().join("missing.json")).is_err());
    }
}
