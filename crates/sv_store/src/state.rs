//! In-memory auth state of one running session.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use sv_proto::{Credentials, KeyBlob};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    error::StoreError,
    repository::{CredentialRepository, StoredAuthState},
};

/// Serializes the writes of one session id. Held across the snapshot and the
/// `save` round trip, and by a reconnect while it reloads.
pub type WriteGate = Arc<tokio::sync::Mutex<()>>;

pub fn new_write_gate() -> WriteGate {
    Arc::new(tokio::sync::Mutex::new(()))
}

/// Credentials and key-blob of one session plus the means to persist them.
///
/// Mutations only take short `parking_lot` locks; [`persist`](Self::persist)
/// takes the write gate and saves a snapshot of whatever is current once the
/// gate is held.
pub struct SessionAuthState {
    session_id: String,
    credentials: Mutex<Credentials>,
    keys: Mutex<KeyBlob>,
    gate: WriteGate,
    repository: Arc<dyn CredentialRepository>,
    retired: AtomicBool,
    failure_reports: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl SessionAuthState {
    /// Load the stored state of `session_id`. Waits for writes still in
    /// flight on `gate` so a reconnect never reads a half-finished save.
    pub async fn load(
        session_id: impl Into<String>,
        repository: Arc<dyn CredentialRepository>,
        gate: WriteGate,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let stored = {
            let _guard = gate.lock().await;
            repository.load(&session_id).await
        };
        Arc::new(Self::from_stored(session_id, stored, repository, gate))
    }

    pub fn from_stored(
        session_id: String,
        stored: StoredAuthState,
        repository: Arc<dyn CredentialRepository>,
        gate: WriteGate,
    ) -> Self {
        let StoredAuthState { credentials, keys } = stored;
        Self {
            session_id,
            credentials: Mutex::new(credentials),
            keys: Mutex::new(keys),
            gate,
            repository,
            retired: AtomicBool::new(false),
            failure_reports: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.lock().clone()
    }

    pub fn replace_credentials(&self, credentials: Credentials) {
        *self.credentials.lock() = credentials;
    }

    pub fn keys_snapshot(&self) -> KeyBlob {
        self.keys.lock().clone()
    }

    /// Read the key-blob under its lock.
    pub fn read_keys<R>(&self, f: impl FnOnce(&KeyBlob) -> R) -> R {
        f(&self.keys.lock())
    }

    /// Mutate the key-blob under its lock. Nothing is written until
    /// [`persist`](Self::persist).
    pub fn with_keys<R>(&self, f: impl FnOnce(&mut KeyBlob) -> R) -> R {
        f(&mut self.keys.lock())
    }

    /// Save credentials and key-blob as they are once the gate is held.
    ///
    /// A retired state no longer writes: its session was closed or logged
    /// out and a late save must not reactivate the row. Such a save fails
    /// with [`StoreError::Retired`].
    pub async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.gate.lock().await;
        if self.is_retired() {
            debug!(session_id = %self.session_id, "state retired; refusing save");
            return Err(self.retired_error());
        }
        let credentials = self.credentials();
        let keys = self.keys_snapshot();
        self.repository
            .save(&self.session_id, &credentials, &keys)
            .await
    }

    /// Stop all further writes through this state.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn retired_error(&self) -> StoreError {
        StoreError::Retired(self.session_id.clone())
    }

    /// Receive the messages of save failures that happened outside the
    /// owner's own [`persist`](Self::persist) calls. Replaces any earlier
    /// receiver.
    pub fn failure_reports(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.failure_reports.lock() = Some(tx);
        rx
    }

    /// Forward a failed save to the [`failure_reports`](Self::failure_reports)
    /// receiver. Refusals of a retired state are not failures.
    pub(crate) fn report_failure(&self, err: &StoreError) {
        if matches!(err, StoreError::Retired(_)) {
            return;
        }
        if let Some(tx) = self.failure_reports.lock().as_ref() {
            let _ = tx.send(err.to_string());
        }
    }

    /// Retire and clear the row's active flag, after any save in flight.
    pub async fn deactivate(&self) -> Result<(), StoreError> {
        let _guard = self.gate.lock().await;
        self.retire();
        self.repository.deactivate(&self.session_id).await
    }
}

impl std::fmt::Debug for SessionAuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthState")
            .field("session_id", &self.session_id)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}
