//! sv_store: Durable authentication state for Sessionvault
//!
//! # Storage model
//! One row per session in `auth_sessions`:
//! - `credentials`: the session's identity material, codec text
//! - `keys_`      : the whole key-blob, codec text
//! - `is_active`  : cleared on logout; the row itself is kept
//!
//! Binary key material goes through `sv_proto::codec`, which tags buffers so
//! they survive the text column byte for byte.
//!
//! # Write path
//! All writes of one session go through its [`SessionAuthState`], which holds
//! the in-memory view and a per-session write gate. Saves are whole-row
//! overwrites of that latest view; the gate keeps two writers of the same
//! session from interleaving.
//!
//! # Migration
//! Versioned migrations in `migrations` run on open and collapse the older
//! split-column `wa_sessions` layouts into the unified table.

pub mod db;
pub mod error;
pub mod keystore;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod state;

pub use db::{DatabaseConnection, Row, SqlValue, SqliteDatabase};
pub use error::{DatabaseError, StoreError};
pub use keystore::{KeyData, KeyStore, KeyUpdates};
pub use models::SessionRecord;
pub use repository::{CredentialRepository, SqlCredentialRepository, StoredAuthState};
pub use state::{new_write_gate, SessionAuthState, WriteGate};
