//! Credential repository: the durable row of one session.

use std::sync::Arc;

use async_trait::async_trait;
use sv_proto::{codec, Credentials, KeyBlob};
use tracing::{debug, warn};

use crate::{
    db::DatabaseConnection,
    error::StoreError,
    migrations,
    models::SessionRecord,
};

/// What a session starts from: its credentials and its key-blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredAuthState {
    pub credentials: Credentials,
    pub keys: KeyBlob,
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Active state of `session_id`, or fresh empty state when there is no
    /// usable row. Never fails: storage and decode problems are logged and
    /// degrade to fresh state.
    async fn load(&self, session_id: &str) -> StoredAuthState;

    /// Upsert the full row and mark it active. No merging happens here.
    async fn save(
        &self,
        session_id: &str,
        credentials: &Credentials,
        keys: &KeyBlob,
    ) -> Result<(), StoreError>;

    /// Soft logout: clear `is_active`, keep the row.
    async fn deactivate(&self, session_id: &str) -> Result<(), StoreError>;
}

/// Repository over any [`DatabaseConnection`].
#[derive(Clone)]
pub struct SqlCredentialRepository {
    db: Arc<dyn DatabaseConnection>,
}

impl SqlCredentialRepository {
    /// Wrap `db` and bring its schema up to date.
    pub async fn open(db: Arc<dyn DatabaseConnection>) -> Result<Self, StoreError> {
        migrations::run_migrations(db.as_ref()).await?;
        Ok(Self { db })
    }

    /// Raw row regardless of `is_active`.
    pub async fn record(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let rows = self
            .db
            .execute(
                "SELECT id, credentials, keys_, is_active FROM auth_sessions WHERE id = ?",
                &[session_id.into()],
            )
            .await?;
        rows.first()
            .map(SessionRecord::try_from)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Ids of every active session, for restarting them after a process restart.
    pub async fn active_sessions(&self) -> Result<Vec<String>, StoreError> {
        let rows = self
            .db
            .execute(
                "SELECT id FROM auth_sessions WHERE is_active = ? ORDER BY id",
                &[true.into()],
            )
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(id) = row.text("id")? {
                ids.push(id.to_owned());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl CredentialRepository for SqlCredentialRepository {
    async fn load(&self, session_id: &str) -> StoredAuthState {
        let rows = match self
            .db
            .execute(
                "SELECT credentials, keys_ FROM auth_sessions WHERE id = ? AND is_active = ?",
                &[session_id.into(), true.into()],
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(session_id, error = %err, "loading auth state failed; starting fresh");
                return StoredAuthState::default();
            }
        };

        let Some(row) = rows.first() else {
            debug!(session_id, "no active row; starting fresh");
            return StoredAuthState::default();
        };

        let credentials = match row.text("credentials") {
            Ok(Some(text)) => codec::decode(text).and_then(Credentials::from_value),
            Ok(None) => Ok(Credentials::empty()),
            Err(err) => Err(sv_proto::DecodeError::new("$", err.to_string())),
        }
        .unwrap_or_else(|err| {
            warn!(session_id, error = %err, "stored credentials are unreadable; using fresh credentials");
            Credentials::empty()
        });

        let keys = match row.text("keys_") {
            Ok(Some(text)) => codec::decode(text).and_then(KeyBlob::from_value),
            Ok(None) => Ok(KeyBlob::new()),
            Err(err) => Err(sv_proto::DecodeError::new("$", err.to_string())),
        }
        .unwrap_or_else(|err| {
            warn!(session_id, error = %err, "stored key-blob is unreadable; using an empty one");
            KeyBlob::new()
        });

        StoredAuthState { credentials, keys }
    }

    async fn save(
        &self,
        session_id: &str,
        credentials: &Credentials,
        keys: &KeyBlob,
    ) -> Result<(), StoreError> {
        let credentials_text = codec::encode(&credentials.to_value());
        let keys_text = codec::encode(&keys.to_value());
        self.db
            .execute(
                "INSERT INTO auth_sessions (id, credentials, keys_, is_active) VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    credentials = excluded.credentials,
                    keys_ = excluded.keys_,
                    is_active = excluded.is_active",
                &[
                    session_id.into(),
                    credentials_text.into(),
                    keys_text.into(),
                    true.into(),
                ],
            )
            .await?;
        debug!(session_id, "auth state saved");
        Ok(())
    }

    async fn deactivate(&self, session_id: &str) -> Result<(), StoreError> {
        self.db
            .execute(
                "UPDATE auth_sessions SET is_active = ? WHERE id = ?",
                &[false.into(), session_id.into()],
            )
            .await?;
        debug!(session_id, "session deactivated");
        Ok(())
    }
}
