//! Key categories and their storage buckets.
//!
//! The protocol client names its key kinds one way (`pre-key`); the key-blob
//! stores them under another (`preKeys`). This table is the only place the two
//! are related, and both the read and the write path go through it.

use std::{fmt, str::FromStr};

use crate::error::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyCategory {
    PreKey,
    Session,
    SenderKey,
    AppStateSyncKey,
    AppStateSyncVersion,
    SenderKeyMemory,
}

impl KeyCategory {
    pub const ALL: [KeyCategory; 6] = [
        KeyCategory::PreKey,
        KeyCategory::Session,
        KeyCategory::SenderKey,
        KeyCategory::AppStateSyncKey,
        KeyCategory::AppStateSyncVersion,
        KeyCategory::SenderKeyMemory,
    ];

    /// Name used by the protocol client.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyCategory::PreKey => "pre-key",
            KeyCategory::Session => "session",
            KeyCategory::SenderKey => "sender-key",
            KeyCategory::AppStateSyncKey => "app-state-sync-key",
            KeyCategory::AppStateSyncVersion => "app-state-sync-version",
            KeyCategory::SenderKeyMemory => "sender-key-memory",
        }
    }

    /// Bucket name inside the persisted key-blob.
    pub fn bucket(self) -> &'static str {
        match self {
            KeyCategory::PreKey => "preKeys",
            KeyCategory::Session => "sessions",
            KeyCategory::SenderKey => "senderKeys",
            KeyCategory::AppStateSyncKey => "appStateSyncKeys",
            KeyCategory::AppStateSyncVersion => "appStateVersions",
            KeyCategory::SenderKeyMemory => "senderKeyMemory",
        }
    }

    pub fn from_bucket(bucket: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.bucket() == bucket)
    }
}

impl FromStr for KeyCategory {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ProtoError::UnknownCategory(s.to_owned()))
    }
}

impl fmt::Display for KeyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
