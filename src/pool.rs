//! Pooled connections to a Redis-compatible server.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use async_trait::async_trait;
use deadpool_redis::{
    Connection, Manager, Pool, Runtime,
    redis::{self, ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo},
};

use crate::{
    backend::Backend,
    error::{Error, Result},
};

pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(Error::Config(format!("unsupported network: {other}"))),
        }
    }
}

#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) size: usize,
    pub(crate) network: Network,
    pub(crate) address: String,
    pub(crate) password: Option<String>,
    pub(crate) database: Option<i64>,
    pub(crate) connect_timeout: Duration,
    pub(crate) io_timeout: Duration,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("size", &self.size)
            .field("network", &self.network)
            .field("address", &self.address)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl PoolConfig {
    /// `address` is `host:port` for [`Network::Tcp`] and a socket path for [`Network::Unix`].
    pub fn new<A: Into<String>>(address: A) -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            network: Network::Tcp,
            address: address.into(),
            password: None,
            database: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// An empty password means no authentication.
    #[must_use]
    pub fn with_password<P: Into<String>>(mut self, password: P) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = Some(database);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    fn connection_info(&self) -> Result<ConnectionInfo> {
        let addr = match self.network {
            Network::Tcp => {
                let (host, port) = self.address.rsplit_once(':').ok_or_else(|| {
                    Error::Config(format!("address must be host:port, got {}", self.address))
                })?;
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::Config(format!("invalid port: {port}")))?;
                ConnectionAddr::Tcp(host.to_string(), port)
            }
            Network::Unix => ConnectionAddr::Unix(PathBuf::from(&self.address)),
        };

        Ok(ConnectionInfo {
            addr,
            redis: RedisConnectionInfo {
                db: self.database.unwrap_or(0),
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }
}

/// Parse an optional logical database selector such as `"2"`.
pub(crate) fn parse_database(database: &str) -> Result<i64> {
    database
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|db| *db >= 0)
        .ok_or_else(|| Error::Config(format!("invalid database selector: {database}")))
}

/// A bounded pool of Redis connections.
///
/// Connections are checked out per round-trip and returned to the pool when the guard is
/// dropped, on every exit path.
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
    io_timeout: Duration,
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPool")
            .field("status", &self.pool.status())
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl RedisPool {
    /// Build a pool. No connection is made until the first checkout.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(Error::Config("pool size must be greater than zero".into()));
        }

        let manager = Manager::new(config.connection_info()?)?;
        let pool = Pool::builder(manager)
            .max_size(config.size)
            .wait_timeout(Some(config.connect_timeout))
            .create_timeout(Some(config.connect_timeout))
            .recycle_timeout(Some(config.io_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|err| Error::Config(err.to_string()))?;

        Ok(Self {
            pool,
            io_timeout: config.io_timeout,
        })
    }

    /// Wrap a pool built by the caller.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check out a connection.
    pub async fn acquire(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.acquire().await?;
        match tokio::time::timeout(self.io_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Connection(format!(
                "round-trip timed out after {:?}",
                self.io_timeout
            ))),
        }
    }
}

#[async_trait]
impl Backend for RedisPool {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        self.query(redis::cmd("SETEX").arg(key).arg(ttl_secs).arg(value))
            .await
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool> {
        let reply: Option<String> = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let _removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let _pong: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_network_names() {
        assert_eq!("tcp".parse::<Network>().expect("tcp parses"), Network::Tcp);
        assert_eq!("unix".parse::<Network>().expect("unix parses"), Network::Unix);
        assert!(matches!("udp".parse::<Network>(), Err(Error::Config(_))));
    }

    #[test]
    fn tcp_connection_info() {
        let info = PoolConfig::new("cache.internal:6380")
            .with_password("hunter2")
            .with_database(3)
            .connection_info()
            .expect("config is valid");

        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 6380) if host == "cache.internal"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn empty_password_means_none() {
        let config = PoolConfig::new("localhost:6379").with_password("");
        assert!(config.password.is_none());
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(matches!(
            PoolConfig::new("localhost").connection_info(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PoolConfig::new("localhost:http").connection_info(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn database_selector() {
        assert_eq!(parse_database("2").expect("selector parses"), 2);
        assert!(matches!(parse_database("two"), Err(Error::Config(_))));
        assert!(matches!(parse_database("-1"), Err(Error::Config(_))));
    }

    #[test]
    fn zero_sized_pool_is_rejected() {
        let config = PoolConfig::new("localhost:6379").with_size(0);
        assert!(matches!(RedisPool::new(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn building_a_pool_does_not_connect() {
        let config = PoolConfig::new("127.0.0.1:1").with_size(5);
        let pool = RedisPool::new(&config).expect("pool builds");
        assert_eq!(pool.pool().status().max_size, 5);
    }

    #[test]
    fn debug_redacts_password() {
        let config = PoolConfig::new("localhost:6379").with_password("hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
