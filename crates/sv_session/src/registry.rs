//! Live client handles by session id.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use sv_proto::ProtocolClient;

use crate::error::SessionError;

/// Shared table of connected clients. Clones share the same table, so one
/// registry can be handed to every session task and to outbound callers.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ProtocolClient>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle this one replaced, if any.
    pub fn register(
        &self,
        session_id: impl Into<String>,
        client: Arc<dyn ProtocolClient>,
    ) -> Option<Arc<dyn ProtocolClient>> {
        self.inner.write().insert(session_id.into(), client)
    }

    pub fn lookup(&self, session_id: &str) -> Result<Arc<dyn ProtocolClient>, SessionError> {
        self.inner
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_owned()))
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<dyn ProtocolClient>> {
        self.inner.write().remove(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.read().contains_key(session_id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
