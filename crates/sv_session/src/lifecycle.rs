//! Connection lifecycle of one session.
//!
//! A [`LifecycleController`] loads the stored state, builds a client through
//! the [`ClientFactory`], then follows the client's events: credential
//! updates are persisted (and failed key-store writes counted along with
//! them), an open connection is registered, a close either
//! reconnects after a fixed delay or, when the server rejected the
//! credentials, deactivates the session for good.

use std::sync::Arc;

use async_trait::async_trait;
use sv_proto::{ClientEvent, ConnectionState, Credentials, DisconnectReason, ProtocolClient};
use sv_store::{
    new_write_gate, CredentialRepository, KeyStore, SessionAuthState, StoreError, WriteGate,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{config::SessionConfig, registry::SessionRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Connecting,
    Open,
    /// Between a transient close and the next attempt.
    Closed,
    LoggedOut,
    Failed { reason: String },
    Stopped,
}

impl LifecycleState {
    /// No further transitions follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::Failed { .. } | Self::Stopped)
    }
}

/// Builds the protocol client of a session from its stored state.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        credentials: Credentials,
        keys: KeyStore,
    ) -> anyhow::Result<Arc<dyn ProtocolClient>>;
}

enum Outcome {
    Reconnect,
    LoggedOut,
    Failed(String),
    Stopped,
}

/// Run of identical save errors.
#[derive(Debug, Default)]
struct SaveFailures {
    last: Option<String>,
    count: u32,
}

impl SaveFailures {
    fn record(&mut self, message: String) -> u32 {
        if self.last.as_deref() == Some(message.as_str()) {
            self.count += 1;
        } else {
            self.last = Some(message);
            self.count = 1;
        }
        self.count
    }

    fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

enum SaveResult {
    Saved,
    Pending,
    Fatal(String),
}

pub struct LifecycleController {
    session_id: String,
    config: SessionConfig,
    repository: Arc<dyn CredentialRepository>,
    factory: Arc<dyn ClientFactory>,
    registry: SessionRegistry,
    gate: WriteGate,
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: watch::Receiver<bool>,
}

impl LifecycleController {
    /// `shutdown` stops the controller once it reads `true` or its sender
    /// is dropped.
    pub fn new(
        session_id: impl Into<String>,
        config: SessionConfig,
        repository: Arc<dyn CredentialRepository>,
        factory: Arc<dyn ClientFactory>,
        registry: SessionRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            session_id: session_id.into(),
            config,
            repository,
            factory,
            registry,
            gate: new_write_gate(),
            state: Arc::new(state),
            shutdown,
        }
    }

    /// Share a write gate with earlier runs of the same session id.
    pub fn with_gate(mut self, gate: WriteGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub(crate) fn state_sender(&self) -> Arc<watch::Sender<LifecycleState>> {
        self.state.clone()
    }

    fn set_state(&self, next: LifecycleState) {
        debug!(session_id = %self.session_id, state = ?next, "lifecycle transition");
        self.state.send_replace(next);
    }

    /// Drive the session until it reaches a terminal state, and return it.
    pub async fn run(self) -> LifecycleState {
        let mut shutdown = self.shutdown.clone();
        let mut failed_attempts: u32 = 0;
        let mut save_failures = SaveFailures::default();

        loop {
            if stop_requested(&shutdown) {
                return self.finish(LifecycleState::Stopped);
            }
            self.set_state(LifecycleState::Connecting);

            let auth =
                SessionAuthState::load(&self.session_id, self.repository.clone(), self.gate.clone())
                    .await;
            let keys = KeyStore::new(auth.clone());

            let outcome = match self
                .factory
                .connect(&self.session_id, auth.credentials(), keys)
                .await
            {
                Ok(client) => {
                    self.drive(
                        client,
                        &auth,
                        &mut failed_attempts,
                        &mut save_failures,
                        &mut shutdown,
                    )
                    .await
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "creating client failed");
                    auth.retire();
                    Outcome::Reconnect
                }
            };

            match outcome {
                Outcome::Reconnect => {}
                Outcome::LoggedOut => return self.finish(LifecycleState::LoggedOut),
                Outcome::Failed(reason) => {
                    return self.finish(LifecycleState::Failed { reason })
                }
                Outcome::Stopped => return self.finish(LifecycleState::Stopped),
            }

            failed_attempts += 1;
            if let Some(max) = self.config.max_reconnect_attempts {
                if failed_attempts > max {
                    return self.finish(LifecycleState::Failed {
                        reason: format!("gave up after {max} reconnect attempts"),
                    });
                }
            }
            self.set_state(LifecycleState::Closed);
            info!(
                session_id = %self.session_id,
                attempt = failed_attempts,
                delay_ms = self.config.reconnect_delay_ms,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = wait_for_stop(&mut shutdown) => {
                    return self.finish(LifecycleState::Stopped);
                }
            }
        }
    }

    async fn drive(
        &self,
        client: Arc<dyn ProtocolClient>,
        auth: &Arc<SessionAuthState>,
        failed_attempts: &mut u32,
        save_failures: &mut SaveFailures,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let mut events = client.subscribe();
        let mut key_failures = auth.failure_reports();
        let mut save_pending = false;

        loop {
            let retry_due = save_pending;
            let delay = self.config.reconnect_delay();
            let retry = async move {
                if retry_due {
                    tokio::time::sleep(delay).await;
                } else {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                _ = wait_for_stop(shutdown) => {
                    info!(session_id = %self.session_id, "stop requested");
                    self.release(&client, auth, save_pending).await;
                    client.close_transport();
                    return Outcome::Stopped;
                }
                _ = retry => {
                    match self.save(auth, save_failures).await {
                        SaveResult::Saved => save_pending = false,
                        SaveResult::Pending => {}
                        SaveResult::Fatal(reason) => return self.escalate(&client, auth, reason),
                    }
                }
                Some(message) = key_failures.recv() => {
                    match self.count_failure(save_failures, message) {
                        SaveResult::Fatal(reason) => return self.escalate(&client, auth, reason),
                        SaveResult::Saved | SaveResult::Pending => save_pending = true,
                    }
                }
                event = events.recv() => match event {
                    Some(ClientEvent::CredentialsUpdated) => {
                        auth.replace_credentials(client.current_credentials());
                        match self.save(auth, save_failures).await {
                            SaveResult::Saved => save_pending = false,
                            SaveResult::Pending => save_pending = true,
                            SaveResult::Fatal(reason) => return self.escalate(&client, auth, reason),
                        }
                    }
                    Some(ClientEvent::ConnectionUpdate(update)) => match update.state {
                        ConnectionState::Connecting => self.set_state(LifecycleState::Connecting),
                        ConnectionState::Open => {
                            self.registry.register(self.session_id.clone(), client.clone());
                            *failed_attempts = 0;
                            info!(session_id = %self.session_id, "connection open");
                            self.set_state(LifecycleState::Open);
                        }
                        ConnectionState::Close => {
                            return self.on_close(&client, auth, update.disconnect, save_pending).await;
                        }
                    },
                    None => {
                        debug!(session_id = %self.session_id, "event stream ended");
                        return self.on_close(&client, auth, None, save_pending).await;
                    }
                },
            }
        }
    }

    async fn save(&self, auth: &SessionAuthState, failures: &mut SaveFailures) -> SaveResult {
        match auth.persist().await {
            Ok(()) => {
                failures.reset();
                SaveResult::Saved
            }
            Err(err) => self.count_failure(failures, err.to_string()),
        }
    }

    /// Count a failed save, from the controller or from the key store.
    fn count_failure(&self, failures: &mut SaveFailures, message: String) -> SaveResult {
        let count = failures.record(message.clone());
        warn!(
            session_id = %self.session_id,
            error = %message,
            count,
            "saving auth state failed"
        );
        if count >= self.config.max_identical_save_failures {
            SaveResult::Fatal(format!("saving auth state failed {count} times: {message}"))
        } else {
            SaveResult::Pending
        }
    }

    fn escalate(
        &self,
        client: &Arc<dyn ProtocolClient>,
        auth: &SessionAuthState,
        reason: String,
    ) -> Outcome {
        warn!(session_id = %self.session_id, %reason, "persistence failing; closing session");
        auth.retire();
        self.registry.remove(&self.session_id);
        client.close_transport();
        Outcome::Failed(reason)
    }

    /// Unregister and stop writing, after one last attempt at a pending save.
    async fn release(
        &self,
        client: &Arc<dyn ProtocolClient>,
        auth: &SessionAuthState,
        save_pending: bool,
    ) {
        if save_pending {
            match auth.persist().await {
                Ok(()) | Err(StoreError::Retired(_)) => {}
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, "dropping unsaved credentials")
                }
            }
        }
        auth.retire();
        if let Ok(current) = self.registry.lookup(&self.session_id) {
            if Arc::ptr_eq(&current, client) {
                self.registry.remove(&self.session_id);
            }
        }
    }

    async fn on_close(
        &self,
        client: &Arc<dyn ProtocolClient>,
        auth: &SessionAuthState,
        reason: Option<DisconnectReason>,
        save_pending: bool,
    ) -> Outcome {
        let rejected = reason
            .as_ref()
            .is_some_and(|r| r.is_auth_rejected(&self.config.logout_status_codes));
        if !rejected {
            info!(
                session_id = %self.session_id,
                status = ?reason.as_ref().and_then(|r| r.status_code),
                "connection closed"
            );
            self.release(client, auth, save_pending).await;
            return Outcome::Reconnect;
        }

        info!(session_id = %self.session_id, "credentials rejected; logging out");
        self.release(client, auth, false).await;
        self.deactivate(auth).await
    }

    async fn deactivate(&self, auth: &SessionAuthState) -> Outcome {
        let attempts = self.config.max_identical_save_failures;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match auth.deactivate().await {
                Ok(()) => return Outcome::LoggedOut,
                Err(err) => {
                    warn!(session_id = %self.session_id, error = %err, attempt, "deactivation failed");
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.reconnect_delay()).await;
                    }
                }
            }
        }
        Outcome::Failed(format!("deactivation failed: {last_error}"))
    }

    fn finish(&self, state: LifecycleState) -> LifecycleState {
        info!(session_id = %self.session_id, state = ?state, "session finished");
        self.set_state(state.clone());
        state
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Resolves once a stop is requested or the requester went away.
async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_failures_are_counted_in_a_row() {
        let mut failures = SaveFailures::default();
        assert_eq!(failures.record("disk full".into()), 1);
        assert_eq!(failures.record("disk full".into()), 2);
        assert_eq!(failures.record("locked".into()), 1);
        assert_eq!(failures.record("locked".into()), 2);
        failures.reset();
        assert_eq!(failures.record("locked".into()), 1);
    }

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::LoggedOut.is_terminal());
        assert!(LifecycleState::Stopped.is_terminal());
        assert!(LifecycleState::Failed { reason: "x".into() }.is_terminal());
        assert!(!LifecycleState::Closed.is_terminal());
        assert!(!LifecycleState::Open.is_terminal());
    }
}
