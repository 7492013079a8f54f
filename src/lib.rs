//! Redis-backed session persistence for `tower`/`axum` services.
//!
//! Session payloads live in a Redis-compatible server under `{prefix}{session id}` with a
//! time-to-live equal to the session's max age. The client only holds the session identifier,
//! sealed into a cookie by a rotating [`KeyChain`]: HMAC-SHA256 authenticated and, when the key
//! pair carries an encryption key, AES-GCM encrypted.
//!
//! [`RedisSessionManagerLayer`] wires a [`RedisSessionStore`] into a service stack and hands
//! handlers a [`SessionHandle`]. The store also implements
//! [`tower_sessions_core::SessionStore`] for use with other session managers.
//!
//! # Failure policy
//! Loading never fails: a missing or tampered cookie, an expired remote entry, a corrupt payload
//! or an unreachable server all yield a new empty session. Saving and deleting surface their
//! errors, since silently dropping a write would lose data.

mod backend;
mod codec;
mod config;
mod error;
mod keys;
pub mod layer;
mod pool;
mod session;
mod store;

pub use tower_cookies::cookie::SameSite;

pub use crate::backend::{Backend, MemoryBackend};
pub use crate::codec::{Codec, DEFAULT_MAX_LENGTH};
pub use crate::config::{DEFAULT_COOKIE_NAME, DEFAULT_MAX_AGE, SessionConfig};
pub use crate::error::{Error, Result};
pub use crate::keys::{KeyChain, KeyPair};
pub use crate::layer::RedisSessionManagerLayer;
pub use crate::pool::{Network, PoolConfig, RedisPool};
pub use crate::session::{Session, SessionHandle, SessionId, SessionState};
pub use crate::store::RedisSessionStore;
