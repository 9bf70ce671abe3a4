//! Supervision of many sessions, one controller task each.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use sv_store::{new_write_gate, CredentialRepository, WriteGate};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::SessionConfig,
    error::SessionError,
    lifecycle::{ClientFactory, LifecycleController, LifecycleState},
    registry::SessionRegistry,
};

struct RunningSession {
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<LifecycleState>,
}

pub struct SessionManager {
    config: SessionConfig,
    repository: Arc<dyn CredentialRepository>,
    factory: Arc<dyn ClientFactory>,
    registry: SessionRegistry,
    sessions: Mutex<HashMap<String, RunningSession>>,
    /// Kept across `stop` so a restart shares the gate with late writes of
    /// the previous run; dropped once a logout completes.
    gates: Mutex<HashMap<String, WriteGate>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        repository: Arc<dyn CredentialRepository>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            config,
            repository,
            factory,
            registry: SessionRegistry::new(),
            sessions: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Shared registry of live clients, for outbound lookups.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn gate(&self, session_id: &str) -> WriteGate {
        self.gates
            .lock()
            .entry(session_id.to_owned())
            .or_insert_with(new_write_gate)
            .clone()
    }

    /// Spawn the controller of `session_id`. A session whose previous task
    /// already finished may be started again.
    pub fn start(&self, session_id: &str) -> Result<watch::Receiver<LifecycleState>, SessionError> {
        let mut sessions = self.sessions.lock();
        if let Some(running) = sessions.get(session_id) {
            if !running.task.is_finished() {
                return Err(SessionError::AlreadyRunning(session_id.to_owned()));
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let controller = LifecycleController::new(
            session_id,
            self.config.clone(),
            self.repository.clone(),
            self.factory.clone(),
            self.registry.clone(),
            shutdown_rx,
        )
        .with_gate(self.gate(session_id));
        let receiver = controller.subscribe();
        let state = controller.state_sender();
        let task = tokio::spawn(controller.run());

        info!(session_id, "session started");
        sessions.insert(
            session_id.to_owned(),
            RunningSession {
                state,
                shutdown,
                task,
            },
        );
        Ok(receiver)
    }

    pub fn state(&self, session_id: &str) -> Result<LifecycleState, SessionError> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|running| running.state.borrow().clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_owned()))
    }

    pub fn subscribe(&self, session_id: &str) -> Result<watch::Receiver<LifecycleState>, SessionError> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|running| running.state.subscribe())
            .ok_or_else(|| SessionError::NotFound(session_id.to_owned()))
    }

    /// Ids of sessions whose controller is still running.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, running)| !running.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop the controller and wait for it. The stored row stays active.
    pub async fn stop(&self, session_id: &str) -> Result<LifecycleState, SessionError> {
        let running = self
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_owned()))?;
        Self::join(session_id, running).await
    }

    async fn join(session_id: &str, running: RunningSession) -> Result<LifecycleState, SessionError> {
        running.shutdown.send_replace(true);
        let state = running
            .task
            .await
            .map_err(|e| SessionError::Task(format!("{session_id}: {e}")))?;
        info!(session_id, state = ?state, "session stopped");
        Ok(state)
    }

    /// Log a session out: unlink the device, stop its controller, and
    /// deactivate the stored row.
    ///
    /// A failing remote logout is logged; the local teardown still happens.
    pub async fn logout(&self, session_id: &str) -> Result<(), SessionError> {
        let client = self.registry.lookup(session_id).ok();
        let running = self.sessions.lock().remove(session_id);
        if client.is_none() && running.is_none() {
            return Err(SessionError::NotFound(session_id.to_owned()));
        }

        if let Some(client) = &client {
            if let Err(err) = client.logout().await {
                warn!(session_id, error = %err, "remote logout failed");
            }
        }

        let state = match running {
            Some(running) => {
                let state = running.state.clone();
                Self::join(session_id, running).await?;
                Some(state)
            }
            None => None,
        };

        let registered = self.registry.remove(session_id);
        if let Some(client) = &client {
            client.close_transport();
        }
        if let Some(other) = registered {
            if !client.as_ref().is_some_and(|c| Arc::ptr_eq(c, &other)) {
                other.close_transport();
            }
        }

        {
            let gate = self.gate(session_id);
            let _guard = gate.lock().await;
            self.repository.deactivate(session_id).await?;
        }
        self.gates.lock().remove(session_id);
        if let Some(state) = state {
            state.send_replace(LifecycleState::LoggedOut);
        }
        info!(session_id, "session logged out");
        Ok(())
    }

    /// Stop every running session without deactivating any of them.
    pub async fn shutdown(&self) {
        let running: Vec<(String, RunningSession)> = self.sessions.lock().drain().collect();
        for (_, session) in &running {
            session.shutdown.send_replace(true);
        }
        for (session_id, session) in running {
            if let Err(err) = Self::join(&session_id, session).await {
                warn!(session_id = %session_id, error = %err, "session did not stop cleanly");
            }
        }
    }
}
