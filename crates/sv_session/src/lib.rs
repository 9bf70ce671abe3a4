//! sv_session: Session supervision for Sessionvault
//!
//! Each session runs as its own task driven by a [`LifecycleController`]:
//!
//! ```text
//! Idle → Connecting → Open ⇄ Connecting
//!                       ↓
//!                    Closed → Connecting (after reconnect_delay)
//!                       ↓
//!                  LoggedOut | Failed | Stopped
//! ```
//!
//! The [`SessionManager`] starts, stops and logs out sessions and owns the
//! shared [`SessionRegistry`] of live clients. Persistence goes through
//! `sv_store`; the protocol client is supplied by a [`ClientFactory`].

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod registry;
pub mod telemetry;

pub use config::SessionConfig;
pub use error::SessionError;
pub use lifecycle::{ClientFactory, LifecycleController, LifecycleState};
pub use manager::SessionManager;
pub use registry::SessionRegistry;
