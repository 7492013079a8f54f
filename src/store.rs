use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;
use tower_sessions_core::{
    SessionStore,
    session::{Id, Record},
    session_store,
};

use crate::{
    backend::Backend,
    codec::{Codec, DEFAULT_MAX_LENGTH},
    config::SessionConfig,
    error::{Error, Result},
    keys::KeyChain,
    pool::{Network, PoolConfig, RedisPool, parse_database},
    session::{Session, SessionId, SessionState, StoredSession},
};

#[derive(Debug, Clone)]
struct Settings {
    keys: KeyChain,
    config: SessionConfig,
    key_prefix: String,
    max_length: usize,
    write_retries: u32,
}

impl Settings {
    fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn codec(&self) -> Codec {
        Codec::new(self.max_length)
    }
}

#[derive(Debug)]
struct Inner<B> {
    backend: B,
    settings: RwLock<Settings>,
}

/// Session store keeping session payloads in a Redis-compatible server and session identifiers
/// in sealed cookies.
///
/// Cloning is cheap and clones share settings: a setter called on one clone applies to every
/// later operation on all of them.
#[derive(Debug)]
pub struct RedisSessionStore<B: Backend = RedisPool> {
    inner: Arc<Inner<B>>,
}

impl<B: Backend> Clone for RedisSessionStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RedisSessionStore<RedisPool> {
    /// Connect to `address` over `network` (`"tcp"` or `"unix"`) with at most `size` pooled
    /// connections. An empty `password` disables authentication.
    ///
    /// Redis has no UDP transport, so `"udp"` and any other network name fail with
    /// [`Error::Config`].
    pub fn new(
        size: usize,
        network: &str,
        address: &str,
        password: &str,
        keys: KeyChain,
    ) -> Result<Self> {
        let config = PoolConfig::new(address)
            .with_size(size)
            .with_network(network.parse::<Network>()?)
            .with_password(password);
        Self::from_config(&config, keys)
    }

    /// Like [`RedisSessionStore::new`] but selects the logical database `db` instead of `0`.
    pub fn new_with_db(
        size: usize,
        network: &str,
        address: &str,
        password: &str,
        db: &str,
        keys: KeyChain,
    ) -> Result<Self> {
        let config = PoolConfig::new(address)
            .with_size(size)
            .with_network(network.parse::<Network>()?)
            .with_password(password)
            .with_database(parse_database(db)?);
        Self::from_config(&config, keys)
    }

    pub fn from_config(config: &PoolConfig, keys: KeyChain) -> Result<Self> {
        Ok(Self::with_backend(RedisPool::new(config)?, keys))
    }

    /// Use a pool built by the caller.
    pub fn from_pool(pool: deadpool_redis::Pool, keys: KeyChain) -> Self {
        Self::with_backend(RedisPool::from_pool(pool), keys)
    }
}

impl<B: Backend> RedisSessionStore<B> {
    pub fn with_backend(backend: B, keys: KeyChain) -> Self {
        let config = SessionConfig::default();
        let settings = Settings {
            keys,
            config,
            key_prefix: String::new(),
            max_length: DEFAULT_MAX_LENGTH,
            write_retries: 0,
        };

        Self {
            inner: Arc::new(Inner {
                backend,
                settings: RwLock::new(settings),
            }),
        }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    fn settings(&self) -> Settings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }

    pub fn config(&self) -> SessionConfig {
        self.settings().config
    }

    /// Replace the cookie options.
    pub fn set_config(&self, config: SessionConfig) {
        self.update(|settings| settings.config = config);
    }

    /// Set the max age of new sessions. Sessions already issued keep their own max age.
    pub fn set_max_age(&self, max_age: Duration) {
        self.update(|settings| settings.config.max_age = max_age);
    }

    pub fn key_prefix(&self) -> String {
        self.settings().key_prefix
    }

    /// Prefix prepended to every remote key.
    pub fn set_key_prefix<P: Into<String>>(&self, prefix: P) {
        let prefix = prefix.into();
        self.update(|settings| settings.key_prefix = prefix);
    }

    /// Maximum encoded payload size in bytes. Zero disables the limit.
    pub fn set_max_length(&self, max_length: usize) {
        self.update(|settings| settings.max_length = max_length);
    }

    /// Number of extra attempts for a failed remote write before giving up.
    pub fn set_write_retries(&self, retries: u32) {
        self.update(|settings| settings.write_retries = retries);
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.settings().config.max_age)
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.backend.ping().await
    }

    /// Load the session referenced by a request cookie value.
    ///
    /// Never fails: a missing, invalid or expired cookie, a missing remote entry, an undecodable
    /// payload and an unreachable backend all yield a new empty session.
    pub async fn load(&self, cookie_value: Option<&str>) -> Session {
        match self.try_load(cookie_value).await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(err = %err, "session load failed");
                self.new_session()
            }
        }
    }

    /// Like [`RedisSessionStore::load`], but a backend failure is returned instead of degrading.
    ///
    /// `Ok` with a new session means the cookie is absent or can no longer resolve: it does
    /// not open, or its remote entry is missing or undecodable. An `Err` says nothing about the
    /// cookie, which may still be valid once the backend recovers.
    pub(crate) async fn try_load(&self, cookie_value: Option<&str>) -> Result<Session> {
        let settings = self.settings();
        let fresh = || Session::new(settings.config.max_age);

        let Some(cookie_value) = cookie_value else {
            return Ok(fresh());
        };

        let id = match settings.keys.open(&settings.config.name, cookie_value) {
            Ok(id) => SessionId::new(id),
            Err(err) => {
                tracing::debug!(err = %err, "session cookie rejected");
                return Ok(fresh());
            }
        };

        let key = settings.key_for(id.as_str());
        let Some(bytes) = self.inner.backend.get(&key).await? else {
            tracing::debug!("session not found in store");
            return Ok(fresh());
        };

        match settings.codec().decode::<StoredSession>(&bytes) {
            Ok(stored) => Ok(Session::loaded(id, stored)),
            Err(err) => {
                tracing::warn!(err = %err, "session payload decode failed");
                Ok(fresh())
            }
        }
    }

    /// Persist the session and return the cookie to send back to the client.
    ///
    /// Assigns an identifier to new sessions. A session whose max age is under one second is
    /// deleted instead, since neither the cookie nor the remote entry can express it. Deleted
    /// sessions produce a removal cookie without touching the store.
    pub async fn save(&self, session: &mut Session) -> Result<Cookie<'static>> {
        let settings = self.settings();

        if session.state == SessionState::Deleted {
            return Ok(settings.config.removal_cookie());
        }
        if session.max_age < Duration::SECOND {
            return self.delete(session).await;
        }

        let bytes = settings.codec().encode(&session.to_stored())?;
        let ttl = ttl_secs(session.max_age);
        let id = session.id.get_or_insert_with(SessionId::generate).clone();

        self.write(&settings, &settings.key_for(id.as_str()), &bytes, ttl)
            .await?;

        if let Some(stale) = session.stale_id.take()
            && stale != id
            && let Err(err) = self.inner.backend.del(&settings.key_for(stale.as_str())).await
        {
            tracing::warn!(err = %err, "failed to remove previous session entry");
        }

        session.state = SessionState::Saved;

        let value = settings
            .keys
            .seal(&settings.config.name, id.as_str(), session.max_age)?;
        Ok(settings.config.build_cookie(value, session.max_age))
    }

    /// Remove the session from the store and return a cookie that expires it on the client.
    ///
    /// Deleting a session that was never saved, or is already gone, is not an error.
    pub async fn delete(&self, session: &mut Session) -> Result<Cookie<'static>> {
        let settings = self.settings();

        for id in session.id.iter().chain(session.stale_id.iter()) {
            self.inner
                .backend
                .del(&settings.key_for(id.as_str()))
                .await
                .map_err(Error::unavailable)?;
        }

        session.id = None;
        session.stale_id = None;
        session.values.clear();
        session.state = SessionState::Deleted;

        Ok(settings.config.removal_cookie())
    }

    async fn write(&self, settings: &Settings, key: &str, bytes: &[u8], ttl: u64) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.inner.backend.set_ex(key, bytes, ttl).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < settings.write_retries => {
                    attempt += 1;
                    tracing::warn!(err = %err, attempt, "session write failed, retrying");
                }
                Err(err) => return Err(Error::unavailable(err)),
            }
        }
    }
}

fn ttl_secs(max_age: Duration) -> u64 {
    u64::try_from(max_age.whole_seconds()).unwrap_or(0).max(1)
}

fn record_ttl(record: &Record) -> u64 {
    ttl_secs(record.expiry_date - OffsetDateTime::now_utc())
}

#[async_trait]
impl<B: Backend> SessionStore for RedisSessionStore<B> {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        let settings = self.settings();
        let codec = settings.codec();
        loop {
            let bytes = codec.encode(&*record)?;
            let key = settings.key_for(&record.id.to_string());
            if self
                .inner
                .backend
                .set_nx_ex(&key, &bytes, record_ttl(record))
                .await?
            {
                return Ok(());
            }
            record.id = Id::default();
        }
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        let settings = self.settings();
        let bytes = settings.codec().encode(record)?;
        let key = settings.key_for(&record.id.to_string());
        self.write(&settings, &key, &bytes, record_ttl(record))
            .await
            .map_err(Into::into)
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let settings = self.settings();
        let key = settings.key_for(&session_id.to_string());
        let bytes = match self.inner.backend.get(&key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(err = %err, "session record load failed");
                return Ok(None);
            }
        };

        Ok(bytes.and_then(|bytes| match settings.codec().decode::<Record>(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(err = %err, "session record decode failed");
                None
            }
        }))
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        let settings = self.settings();
        let key = settings.key_for(&session_id.to_string());
        self.inner.backend.del(&key).await.map_err(Into::into)
    }
}
