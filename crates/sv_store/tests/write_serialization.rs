use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use sv_proto::{Credentials, KeyBlob, KeyCategory, KeyValue};
use sv_store::{
    new_write_gate, CredentialRepository, KeyStore, KeyUpdates, SessionAuthState,
    SqlCredentialRepository, SqliteDatabase, StoreError, StoredAuthState,
};

/// Slows every save down and tracks how many run at once.
struct SlowRepository {
    inner: SqlCredentialRepository,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    saves: AtomicUsize,
}

#[async_trait]
impl CredentialRepository for SlowRepository {
    async fn load(&self, session_id: &str) -> StoredAuthState {
        self.inner.load(session_id).await
    }

    async fn save(
        &self,
        session_id: &str,
        credentials: &Credentials,
        keys: &KeyBlob,
    ) -> Result<(), StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = self.inner.save(session_id, credentials, keys).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.saves.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn deactivate(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.deactivate(session_id).await
    }
}

async fn slow_repository() -> Arc<SlowRepository> {
    let db = Arc::new(SqliteDatabase::in_memory().await.expect("open db"));
    Arc::new(SlowRepository {
        inner: SqlCredentialRepository::open(db).await.expect("migrate"),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        saves: AtomicUsize::new(0),
    })
}

fn pre_key(id: usize) -> KeyUpdates {
    let mut updates = KeyUpdates::new();
    updates.insert(
        KeyCategory::PreKey,
        BTreeMap::from([(id.to_string(), Some(KeyValue::from(vec![id as u8; 4])))]),
    );
    updates
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_key_and_credential_writes_all_land() {
    let repo = slow_repository().await;
    let state = SessionAuthState::load("alpha", repo.clone(), new_write_gate()).await;
    let store = KeyStore::new(state.clone());

    let mut tasks = Vec::new();
    for id in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.set(pre_key(id)).await }));
    }
    tasks.push(tokio::spawn({
        let state = state.clone();
        async move {
            let mut creds = Credentials::empty();
            creds.insert("registrationId", 1234i64);
            state.replace_credentials(creds);
            state.persist().await
        }
    }));
    for task in tasks {
        task.await.expect("join").expect("write");
    }

    assert_eq!(repo.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(repo.saves.load(Ordering::SeqCst), 9);

    let stored = repo.load("alpha").await;
    assert_eq!(
        stored.credentials.get("registrationId").and_then(KeyValue::as_i64),
        Some(1234)
    );
    assert_eq!(stored.keys.len(KeyCategory::PreKey), 8);
}

#[tokio::test]
async fn sessions_share_a_database_without_mixing() {
    let db = Arc::new(SqliteDatabase::in_memory().await.expect("open db"));
    let repo = Arc::new(SqlCredentialRepository::open(db).await.expect("migrate"));

    let alpha = KeyStore::new(SessionAuthState::load("alpha", repo.clone(), new_write_gate()).await);
    let beta = KeyStore::new(SessionAuthState::load("beta", repo.clone(), new_write_gate()).await);
    alpha.set(pre_key(1)).await.unwrap();
    beta.set(pre_key(2)).await.unwrap();

    assert_eq!(repo.load("alpha").await.keys.ids(KeyCategory::PreKey), vec!["1"]);
    assert_eq!(repo.load("beta").await.keys.ids(KeyCategory::PreKey), vec!["2"]);
}
