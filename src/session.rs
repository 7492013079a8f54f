//! In-memory session state.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::Duration;

use crate::error::{Error, Result};

const ID_BYTES: usize = 32;

/// Opaque session identifier: 32 random bytes, URL-safe base64 encoded.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Session ids are bearer credentials; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet persisted, or invalidated.
    New,
    /// Read from the store and not modified since.
    Loaded,
    /// Modified since it was loaded or saved.
    Dirty,
    Saved,
    /// Removed from the store. Terminal.
    Deleted,
}

/// What the store persists for a session.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredSession {
    pub(crate) max_age: i64,
    pub(crate) values: HashMap<String, Value>,
}

/// A bag of JSON values correlated with a client through a cookie.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: Option<SessionId>,
    pub(crate) stale_id: Option<SessionId>,
    pub(crate) values: HashMap<String, Value>,
    pub(crate) max_age: Duration,
    pub(crate) state: SessionState,
}

impl Session {
    /// A fresh session. It receives an identifier on its first save.
    pub fn new(max_age: Duration) -> Self {
        Self {
            id: None,
            stale_id: None,
            values: HashMap::new(),
            max_age,
            state: SessionState::New,
        }
    }

    /// A new session that will be saved under `id` instead of a generated identifier.
    pub fn with_id(id: SessionId, max_age: Duration) -> Self {
        Self {
            id: Some(id),
            ..Self::new(max_age)
        }
    }

    pub(crate) fn loaded(id: SessionId, stored: StoredSession) -> Self {
        Self {
            id: Some(id),
            stale_id: None,
            values: stored.values,
            max_age: Duration::seconds(stored.max_age),
            state: SessionState::Loaded,
        }
    }

    pub(crate) fn to_stored(&self) -> StoredSession {
        StoredSession {
            max_age: self.max_age.whole_seconds(),
            values: self.values.clone(),
        }
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// No identifier has been assigned yet.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_dirty(&self) -> bool {
        self.state == SessionState::Dirty
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.values
            .get(key)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| Error::CorruptPayload(err.to_string()))
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|err| Error::CorruptPayload(err.to_string()))?;
        self.insert_value(key, value);
        Ok(())
    }

    /// Store `value` under `key`. Writing the value already stored does not dirty the session.
    pub fn insert_value(&mut self, key: &str, value: Value) -> Option<Value> {
        if self.values.get(key) == Some(&value) {
            return Some(value);
        }
        let previous = self.values.insert(key.to_string(), value);
        self.mark_dirty();
        previous
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.values.clear();
            self.mark_dirty();
        }
    }

    /// Change the max age. A non-positive value deletes the session on the next save.
    pub fn set_max_age(&mut self, max_age: Duration) {
        self.max_age = max_age;
        self.mark_dirty();
    }

    /// Forget the identifier and the values. The next save issues a new identifier and removes
    /// the previous entry.
    pub fn invalidate(&mut self) {
        self.retire_id();
        self.values.clear();
        self.state = SessionState::New;
    }

    /// Keep the values but issue a new identifier on the next save.
    pub fn cycle_id(&mut self) {
        self.retire_id();
        self.mark_dirty();
    }

    fn retire_id(&mut self) {
        if let Some(id) = self.id.take() {
            self.stale_id.get_or_insert(id);
        }
    }

    fn mark_dirty(&mut self) {
        if self.state != SessionState::Deleted {
            self.state = SessionState::Dirty;
        }
    }
}

/// Shared handle to the current request's [`Session`].
///
/// The session layer inserts one into the request extensions; with the `axum-core` feature it
/// is also an extractor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Lock the session for direct access. Do not hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn id(&self) -> Option<SessionId> {
        self.lock().id.clone()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.lock().get(key)
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.lock().get_value(key).cloned()
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        self.lock().insert(key, value)
    }

    pub fn remove<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.lock()
            .remove_value(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| Error::CorruptPayload(err.to_string()))
    }

    pub fn remove_value(&self, key: &str) -> Option<Value> {
        self.lock().remove_value(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn set_max_age(&self, max_age: Duration) {
        self.lock().set_max_age(max_age);
    }

    /// Delete the session from the store and expire the cookie once the handler returns.
    pub fn purge(&self) {
        self.lock().set_max_age(Duration::ZERO);
    }

    pub fn invalidate(&self) {
        self.lock().invalidate();
    }

    pub fn cycle_id(&self) {
        self.lock().cycle_id();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(feature = "axum-core")]
impl<S: Send + Sync> axum_core::extract::FromRequestParts<S> for SessionHandle {
    type Rejection = (http::StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<SessionHandle>().cloned().ok_or((
            http::StatusCode::INTERNAL_SERVER_ERROR,
            "Can't extract session. Is `RedisSessionManagerLayer` enabled?",
        ))
    }
}
