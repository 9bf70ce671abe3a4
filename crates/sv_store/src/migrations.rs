//! Versioned schema migrations.
//!
//! Applied versions are recorded in `schema_migrations`; every step is also
//! safe to repeat on its own, so an interrupted run can simply be retried.
//!
//! Version 2 folds the older `wa_sessions` layouts into `auth_sessions`:
//! - split columns: `noise_key`, `signed_identity_key`, `signed_pre_key`,
//!   `adv_secret_key`, `keys_`, `appStateSyncKeys_`
//! - single columns: `creds` with `keys_` or `_keys`
//!
//! Key-blobs written by those layouts may use category names (`pre-key`) as
//! top-level keys; they are renamed to bucket names on the way in. Rows that
//! already exist in `auth_sessions` are left alone.

use std::collections::BTreeMap;

use chrono::Utc;
use sv_proto::{
    codec,
    credentials::{ADV_SECRET_KEY, NOISE_KEY, SIGNED_IDENTITY_KEY, SIGNED_PRE_KEY},
    Credentials, KeyBlob, KeyCategory, KeyValue,
};
use tracing::{info, warn};

use crate::{
    db::{DatabaseConnection, Row, SqlValue},
    error::{DatabaseError, StoreError},
};

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

const CREATE_SESSIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS auth_sessions (
    id TEXT PRIMARY KEY,
    credentials TEXT NULL,
    keys_ TEXT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE
)";

const LEGACY_TABLE: &str = "wa_sessions";

#[derive(Debug, Clone, Copy)]
enum Step {
    CreateSessions,
    CollapseLegacy,
}

struct Migration {
    version: i64,
    name: &'static str,
    step: Step,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_auth_sessions",
        step: Step::CreateSessions,
    },
    Migration {
        version: 2,
        name: "collapse_legacy_wa_sessions",
        step: Step::CollapseLegacy,
    },
];

pub const LATEST_VERSION: i64 = 2;

pub async fn run_migrations(db: &dyn DatabaseConnection) -> Result<(), StoreError> {
    db.execute(CREATE_MIGRATIONS_TABLE, &[]).await?;
    let applied = current_version(db).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        match migration.step {
            Step::CreateSessions => {
                db.execute(CREATE_SESSIONS_TABLE, &[]).await?;
            }
            Step::CollapseLegacy => collapse_legacy(db).await?,
        }
        db.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
            &[
                migration.version.into(),
                migration.name.into(),
                Utc::now().to_rfc3339().into(),
            ],
        )
        .await?;
        info!(version = migration.version, name = migration.name, "schema migration applied");
    }

    // The table must exist even if the migration record predates it.
    db.execute(CREATE_SESSIONS_TABLE, &[]).await?;
    Ok(())
}

/// Highest applied version; 0 on a fresh database.
pub async fn current_version(db: &dyn DatabaseConnection) -> Result<i64, StoreError> {
    let rows = db
        .execute("SELECT MAX(version) AS version FROM schema_migrations", &[])
        .await?;
    match rows.first().and_then(|row| row.get("version")) {
        None | Some(SqlValue::Null) => Ok(0),
        Some(SqlValue::Int(v)) => Ok(*v),
        Some(other) => Err(StoreError::Migration(format!(
            "unexpected schema version value {other:?}"
        ))),
    }
}

async fn collapse_legacy(db: &dyn DatabaseConnection) -> Result<(), StoreError> {
    let present = db
        .execute(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[LEGACY_TABLE.into()],
        )
        .await?;
    if present.is_empty() {
        return Ok(());
    }

    let rows = db.execute("SELECT * FROM wa_sessions", &[]).await?;
    let mut imported = 0usize;
    for row in &rows {
        let Some(id) = row.text("id")?.map(str::to_owned) else {
            warn!("skipping legacy session row without id");
            continue;
        };
        let credentials = legacy_credentials(row, &id)?;
        let keys = legacy_keys(row, &id)?;
        let is_active = match row.get("is_active") {
            None | Some(SqlValue::Null) => true,
            Some(_) => row.bool("is_active")?,
        };

        db.execute(
            "INSERT OR IGNORE INTO auth_sessions (id, credentials, keys_, is_active) VALUES (?, ?, ?, ?)",
            &[
                id.as_str().into(),
                credentials
                    .filter(|c| !c.is_empty())
                    .map(|c| codec::encode(&c.to_value()))
                    .into(),
                codec::encode(&keys.to_value()).into(),
                is_active.into(),
            ],
        )
        .await?;
        imported += 1;
    }
    info!(rows = imported, table = LEGACY_TABLE, "legacy session rows collapsed");
    Ok(())
}

fn legacy_credentials(row: &Row, id: &str) -> Result<Option<Credentials>, DatabaseError> {
    if let Some(creds) = decode_column(row, "creds", id)? {
        return match Credentials::from_value(creds) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(err) => {
                warn!(session_id = id, error = %err, "legacy creds are not an object");
                Ok(None)
            }
        };
    }

    let mut credentials = Credentials::empty();
    for (column, field) in [
        ("noise_key", NOISE_KEY),
        ("signed_identity_key", SIGNED_IDENTITY_KEY),
        ("signed_pre_key", SIGNED_PRE_KEY),
    ] {
        if let Some(value) = decode_column(row, column, id)? {
            credentials.insert(field, value);
        }
    }
    if let Some(secret) = row.text("adv_secret_key")? {
        credentials.insert(ADV_SECRET_KEY, secret);
    }
    Ok(Some(credentials))
}

fn legacy_keys(row: &Row, id: &str) -> Result<KeyBlob, DatabaseError> {
    let mut buckets: BTreeMap<String, KeyValue> = BTreeMap::new();

    let stored = match decode_column(row, "keys_", id)? {
        Some(keys) => Some(keys),
        None => decode_column(row, "_keys", id)?,
    };
    if let Some(KeyValue::Map(root)) = stored {
        for (name, entries) in root {
            let bucket = name
                .parse::<KeyCategory>()
                .map(|c| c.bucket().to_owned())
                .unwrap_or(name);
            merge_bucket(&mut buckets, bucket, entries);
        }
    }
    if let Some(app_state) = decode_column(row, "appStateSyncKeys_", id)? {
        merge_bucket(
            &mut buckets,
            KeyCategory::AppStateSyncKey.bucket().to_owned(),
            app_state,
        );
    }

    Ok(KeyBlob::from_value(KeyValue::Map(buckets)).unwrap_or_else(|err| {
        warn!(session_id = id, error = %err, "legacy key-blob has an unexpected shape; dropping it");
        KeyBlob::new()
    }))
}

fn merge_bucket(buckets: &mut BTreeMap<String, KeyValue>, bucket: String, entries: KeyValue) {
    if let KeyValue::Map(incoming) = entries {
        if let Some(KeyValue::Map(existing)) = buckets.get_mut(&bucket) {
            existing.extend(incoming);
        } else {
            buckets.insert(bucket, KeyValue::Map(incoming));
        }
    } else {
        buckets.insert(bucket, entries);
    }
}

/// Decode a text column, treating an absent column, NULL, or undecodable text
/// as missing.
fn decode_column(row: &Row, column: &str, id: &str) -> Result<Option<KeyValue>, DatabaseError> {
    let Some(text) = row.text(column)? else {
        return Ok(None);
    };
    match codec::decode(text) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(session_id = id, column, error = %err, "skipping undecodable legacy column");
            Ok(None)
        }
    }
}
