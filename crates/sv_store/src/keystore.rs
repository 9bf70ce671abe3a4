//! Keyed data store handed to the protocol client.
//!
//! Reads and writes individual keys by category and id. Every category lives
//! in its own bucket of the session's key-blob, and a `set` writes the whole
//! blob back through the session's [`SessionAuthState`].

use std::{collections::BTreeMap, sync::Arc};

use sv_proto::{AppStateSyncKeyData, KeyCategory, KeyValue};
use tracing::debug;

use crate::{error::StoreError, state::SessionAuthState};

/// Per category, per id: `Some` overwrites, `None` deletes.
pub type KeyUpdates = BTreeMap<KeyCategory, BTreeMap<String, Option<KeyValue>>>;

/// A value as the client receives it.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyData {
    Raw(KeyValue),
    AppStateSyncKey(AppStateSyncKeyData),
}

impl KeyData {
    pub fn as_raw(&self) -> Option<&KeyValue> {
        match self {
            Self::Raw(value) => Some(value),
            Self::AppStateSyncKey(_) => None,
        }
    }

    pub fn as_app_state_sync_key(&self) -> Option<&AppStateSyncKeyData> {
        match self {
            Self::AppStateSyncKey(data) => Some(data),
            Self::Raw(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct KeyStore {
    state: Arc<SessionAuthState>,
}

impl KeyStore {
    pub fn new(state: Arc<SessionAuthState>) -> Self {
        Self { state }
    }

    pub fn session_id(&self) -> &str {
        self.state.session_id()
    }

    /// Values for the requested ids. Ids with no stored value are left out.
    pub fn get<S: AsRef<str>>(
        &self,
        category: KeyCategory,
        ids: &[S],
    ) -> Result<BTreeMap<String, KeyData>, StoreError> {
        let found: Vec<(String, KeyValue)> = self.state.read_keys(|keys| {
            ids.iter()
                .filter_map(|id| {
                    let id = id.as_ref();
                    keys.get(category, id).map(|v| (id.to_owned(), v.clone()))
                })
                .collect()
        });

        let mut out = BTreeMap::new();
        for (id, value) in found {
            let data = match category {
                KeyCategory::AppStateSyncKey => {
                    KeyData::AppStateSyncKey(AppStateSyncKeyData::from_value(&id, &value)?)
                }
                _ => KeyData::Raw(value),
            };
            out.insert(id, data);
        }
        Ok(out)
    }

    /// Apply `updates` and write the key-blob. Ids and categories not
    /// mentioned keep their values.
    ///
    /// Once the session's state is retired the batch is refused with
    /// [`StoreError::Retired`] and nothing changes. Other save failures are
    /// also reported to the state's failure receiver.
    pub async fn set(&self, updates: KeyUpdates) -> Result<(), StoreError> {
        if self.state.is_retired() {
            return Err(self.state.retired_error());
        }
        let changed = self.state.with_keys(|keys| {
            let mut changed = 0usize;
            for (category, entries) in updates {
                for (id, value) in entries {
                    match value {
                        Some(value) => keys.put(category, id, value),
                        None => {
                            keys.delete(category, &id);
                        }
                    }
                    changed += 1;
                }
            }
            changed
        });
        if changed == 0 {
            return Ok(());
        }
        debug!(session_id = %self.session_id(), changed, "key updates applied");
        let saved = self.state.persist().await;
        if let Err(err) = &saved {
            self.state.report_failure(err);
        }
        saved
    }

    /// [`set`](Self::set) with category names as strings. An unknown name
    /// rejects the whole batch before anything changes.
    pub async fn set_raw(
        &self,
        updates: BTreeMap<String, BTreeMap<String, Option<KeyValue>>>,
    ) -> Result<(), StoreError> {
        let mut typed = KeyUpdates::new();
        for (name, entries) in updates {
            let category: KeyCategory = name.parse()?;
            typed.entry(category).or_default().extend(entries);
        }
        self.set(typed).await
    }

    /// Stored ids of `category`.
    pub fn ids(&self, category: KeyCategory) -> Vec<String> {
        self.state.read_keys(|keys| keys.ids(category))
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("session_id", &self.session_id())
            .finish()
    }
}
