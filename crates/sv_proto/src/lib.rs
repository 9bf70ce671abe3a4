//! sv_proto: Key material model and codec for Sessionvault
//!
//! Everything a protocol client hands us for safekeeping is expressed as a
//! [`KeyValue`] tree. Binary buffers are a first-class variant so that the
//! text codec can tag them and bring them back byte for byte.
//!
//! # Modules
//! - `value`      : the `KeyValue` tree shared by credentials and key entries
//! - `codec`      : JSON text encoding with tagged binary buffers
//! - `category`   : the closed set of key categories and their storage buckets
//! - `credentials`: static identity material of one session
//! - `keys`       : the per-session key-blob (bucket → id → value)
//! - `app_state`  : structured app-state-sync-key data
//! - `client`     : the protocol client interface and its events
//! - `error`      : unified error types

pub mod app_state;
pub mod category;
pub mod client;
pub mod codec;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod value;

pub use app_state::{AppStateSyncKeyData, AppStateSyncKeyFingerprint};
pub use category::KeyCategory;
pub use client::{
    ClientEvent, ConnectionState, ConnectionUpdate, DisconnectReason, EventStream, ProtocolClient,
};
pub use credentials::Credentials;
pub use error::{DecodeError, ProtoError};
pub use keys::KeyBlob;
pub use value::KeyValue;
