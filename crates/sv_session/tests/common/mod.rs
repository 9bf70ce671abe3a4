#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sv_proto::{
    ClientEvent, ConnectionUpdate, Credentials, DisconnectReason, EventStream, KeyBlob,
    ProtocolClient,
};
use sv_session::{ClientFactory, LifecycleState, SessionConfig};
use sv_store::{
    CredentialRepository, DatabaseError, KeyStore, SqlCredentialRepository, SqliteDatabase,
    StoreError, StoredAuthState,
};
use tokio::sync::{mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("sv_session=debug,sv_store=debug")
        .try_init();
}

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        reconnect_delay_ms: 10,
        ..SessionConfig::default()
    }
}

/// Client driven by the test: events are pushed with [`ScriptedClient::emit`].
pub struct ScriptedClient {
    pub session_id: String,
    pub initial_credentials: Credentials,
    pub keys: KeyStore,
    credentials: Mutex<Credentials>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ClientEvent>>>,
    backlog: Mutex<Vec<ClientEvent>>,
    closed: AtomicBool,
    logouts: AtomicUsize,
    server_closes_on_logout: AtomicBool,
}

impl ScriptedClient {
    fn new(session_id: &str, credentials: Credentials, keys: KeyStore) -> Self {
        Self {
            session_id: session_id.to_owned(),
            initial_credentials: credentials.clone(),
            keys,
            credentials: Mutex::new(credentials),
            subscribers: Mutex::new(Vec::new()),
            backlog: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            logouts: AtomicUsize::new(0),
            server_closes_on_logout: AtomicBool::new(false),
        }
    }

    /// Deliver to current subscribers, or hold until the first one arrives.
    pub fn emit(&self, event: ClientEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            self.backlog.lock().push(event);
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn open(&self) {
        self.emit(ClientEvent::ConnectionUpdate(ConnectionUpdate::open()));
    }

    pub fn close(&self, status: Option<u16>) {
        self.emit(ClientEvent::ConnectionUpdate(ConnectionUpdate::close(
            status.map(DisconnectReason::status),
        )));
    }

    /// Rotate credentials and announce it.
    pub fn rotate(&self, credentials: Credentials) {
        *self.credentials.lock() = credentials;
        self.emit(ClientEvent::CredentialsUpdated);
    }

    /// End every event stream without a close event.
    pub fn hang_up(&self) {
        self.subscribers.lock().clear();
    }

    /// Make `logout` answer with a 401 close and return only once every
    /// listener has dropped its event stream.
    pub fn server_closes_on_logout(&self) {
        self.server_closes_on_logout.store(true, Ordering::SeqCst);
    }

    fn listeners_gone(&self) -> bool {
        self.subscribers.lock().iter().all(|tx| tx.is_closed())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    fn current_credentials(&self) -> Credentials {
        self.credentials.lock().clone()
    }

    fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock();
        for event in self.backlog.lock().drain(..) {
            let _ = tx.send(event);
        }
        subscribers.push(tx);
        rx
    }

    async fn logout(&self) -> anyhow::Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        if self.server_closes_on_logout.load(Ordering::SeqCst) {
            self.close(Some(401));
            tokio::time::timeout(WAIT, async {
                while !self.listeners_gone() {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
            .await?;
        }
        Ok(())
    }

    fn close_transport(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands every client it builds to the test.
pub struct ScriptedFactory {
    created_tx: mpsc::UnboundedSender<Arc<ScriptedClient>>,
    created_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<ScriptedClient>>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        let (created_tx, created_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            created_tx,
            created_rx: tokio::sync::Mutex::new(created_rx),
            failures_left: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` connects fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn next_client(&self) -> Arc<ScriptedClient> {
        let mut rx = self.created_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a client")
            .expect("factory dropped")
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    async fn connect(
        &self,
        session_id: &str,
        credentials: Credentials,
        keys: KeyStore,
    ) -> anyhow::Result<Arc<dyn ProtocolClient>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("handshake refused");
        }
        let client = Arc::new(ScriptedClient::new(session_id, credentials, keys));
        let _ = self.created_tx.send(client.clone());
        Ok(client)
    }
}

/// SQLite repository that counts calls and can be told to fail saves.
pub struct CountingRepository {
    pub inner: SqlCredentialRepository,
    saves: AtomicUsize,
    save_attempts: AtomicUsize,
    deactivations: AtomicUsize,
    save_error: Mutex<Option<String>>,
}

impl CountingRepository {
    pub async fn in_memory() -> Arc<Self> {
        let db = Arc::new(SqliteDatabase::in_memory().await.expect("open db"));
        Arc::new(Self {
            inner: SqlCredentialRepository::open(db).await.expect("migrate"),
            saves: AtomicUsize::new(0),
            save_attempts: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
            save_error: Mutex::new(None),
        })
    }

    pub fn fail_saves(&self, message: Option<&str>) {
        *self.save_error.lock() = message.map(str::to_owned);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRepository for CountingRepository {
    async fn load(&self, session_id: &str) -> StoredAuthState {
        self.inner.load(session_id).await
    }

    async fn save(
        &self,
        session_id: &str,
        credentials: &Credentials,
        keys: &KeyBlob,
    ) -> Result<(), StoreError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self.save_error.lock().clone();
        if let Some(message) = injected {
            return Err(DatabaseError::Unavailable(message).into());
        }
        self.inner.save(session_id, credentials, keys).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.deactivate(session_id).await?;
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn credentials(registration_id: i64) -> Credentials {
    let mut creds = Credentials::empty();
    creds.insert("registrationId", registration_id);
    creds.insert(
        "noiseKey",
        sv_proto::KeyValue::map()
            .with("private", vec![1u8; 32])
            .with("public", vec![2u8; 32]),
    );
    creds
}

/// Wait until the lifecycle state satisfies `pred`.
pub async fn wait_for_state(
    states: &mut watch::Receiver<LifecycleState>,
    pred: impl Fn(&LifecycleState) -> bool,
) -> LifecycleState {
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let current = states.borrow_and_update();
                if pred(&*current) {
                    return (*current).clone();
                }
            }
            if states.changed().await.is_err() {
                let last = states.borrow().clone();
                assert!(pred(&last), "state channel closed in {last:?}");
                return last;
            }
        }
    })
    .await
    .expect("timed out waiting for lifecycle state")
}

/// Poll `check` until it holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
