use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bb8::{ErrorSink, RunError};
use bb8_postgres::{tokio_postgres::NoTls, PostgresConnectionManager};
use tokio_postgres::config::Host;
use tracing::{debug, info, warn};

use crate::error::Error;

pub type PgPool = bb8::Pool<PostgresConnectionManager<NoTls>>;
pub type PgConnection = bb8::PooledConnection<'static, PostgresConnectionManager<NoTls>>;

pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Sizing for the pools a [`PoolRegistry`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: Option<u32>,
    /// How long an acquire waits before failing with [`Error::PoolExhausted`]
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self { Self { max_size: DEFAULT_POOL_SIZE, min_idle: None, connection_timeout: DEFAULT_CONNECTION_TIMEOUT } }
}

impl PoolConfig {
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Defaults overridden by `MONGRES_POOL_MAX_SIZE`, `MONGRES_POOL_MIN_IDLE` and `MONGRES_POOL_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(max_size) = env_var::<u32>("MONGRES_POOL_MAX_SIZE") {
            config.max_size = max_size;
        }
        if let Some(min_idle) = env_var::<u32>("MONGRES_POOL_MIN_IDLE") {
            config.min_idle = Some(min_idle);
        }
        if let Some(millis) = env_var::<u64>("MONGRES_POOL_TIMEOUT_MS") {
            config.connection_timeout = Duration::from_millis(millis);
        }
        config
    }
}

fn env_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {name}={raw:?}");
            None
        }
    }
}

/// A shared handle on one target's pool.
///
/// All handles for a target share one slot; once the registry releases it, every handle reports
/// [`Error::NotConnected`].
#[derive(Clone)]
pub struct PoolHandle {
    slot: Arc<PoolSlot>,
}

struct PoolSlot {
    /// Target description without credentials, safe for logs and errors
    label: String,
    connection_timeout: Duration,
    pool: RwLock<Option<PgPool>>,
    failures: ConnectFailures,
}

impl PoolHandle {
    fn new(label: String, connection_timeout: Duration, pool: PgPool, failures: ConnectFailures) -> Self {
        Self { slot: Arc::new(PoolSlot { label, connection_timeout, pool: RwLock::new(Some(pool)), failures }) }
    }

    pub fn label(&self) -> &str { &self.slot.label }

    pub fn is_released(&self) -> bool { self.read().is_none() }

    /// Whether both handles refer to the same pool instance.
    pub fn same_pool(&self, other: &PoolHandle) -> bool { Arc::ptr_eq(&self.slot, &other.slot) }

    pub fn state(&self) -> Option<bb8::State> { self.read().as_ref().map(|pool| pool.state()) }

    /// Checks out a connection.
    ///
    /// A timeout during which the pool failed to open connections is reported as
    /// [`Error::Connection`] with the server's error; otherwise as [`Error::PoolExhausted`].
    pub async fn acquire(&self) -> Result<PgConnection, Error> {
        let pool = self.read().clone().ok_or_else(|| Error::NotConnected { target: self.slot.label.clone() })?;
        let started = Instant::now();
        pool.get_owned().await.map_err(|err| match err {
            RunError::TimedOut => match self.slot.failures.take_since(started) {
                Some(source) => Error::Connection { target: self.slot.label.clone(), source },
                None => Error::PoolExhausted { target: self.slot.label.clone(), timeout: self.slot.connection_timeout },
            },
            RunError::User(source) => Error::Connection { target: self.slot.label.clone(), source },
        })
    }

    /// Drops the pool; returns false when it was already gone.
    fn release(&self) -> bool {
        let released = self.write().take().is_some();
        if released {
            info!("PoolHandle({}): released", self.slot.label);
        }
        released
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<PgPool>> {
        self.slot.pool.read().unwrap_or_else(|poisoned| {
            warn!("PoolHandle({}): recovering poisoned lock", self.slot.label);
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<PgPool>> {
        self.slot.pool.write().unwrap_or_else(|poisoned| {
            warn!("PoolHandle({}): recovering poisoned lock", self.slot.label);
            poisoned.into_inner()
        })
    }
}

/// Receives the errors bb8 hits while opening connections in the background, keeping the latest.
#[derive(Debug, Clone)]
struct ConnectFailures {
    label: String,
    latest: Arc<Mutex<Option<(Instant, tokio_postgres::Error)>>>,
}

impl ConnectFailures {
    fn new(label: &str) -> Self { Self { label: label.to_owned(), latest: Arc::new(Mutex::new(None)) } }

    /// The latest failure, if it happened at or after `since`.
    fn take_since(&self, since: Instant) -> Option<tokio_postgres::Error> {
        let mut latest = self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match latest.take() {
            Some((at, err)) if at >= since => Some(err),
            _ => None,
        }
    }
}

impl ErrorSink<tokio_postgres::Error> for ConnectFailures {
    fn sink(&self, error: tokio_postgres::Error) {
        warn!("PoolHandle({}): connection attempt failed: {}", self.label, error);
        *self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((Instant::now(), error));
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<tokio_postgres::Error>> { Box::new(self.clone()) }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle").field("target", &self.slot.label).field("released", &self.is_released()).finish()
    }
}

/// Process-wide cache of connection pools keyed by target string.
///
/// Concurrent first acquires for one target are serialized, so each target gets exactly one pool.
#[derive(Clone, Default)]
pub struct PoolRegistry {
    config: PoolConfig,
    pools: Arc<tokio::sync::Mutex<HashMap<String, PoolHandle>>>,
}

static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();

impl PoolRegistry {
    pub fn new(config: PoolConfig) -> Self { Self { config, pools: Arc::new(tokio::sync::Mutex::new(HashMap::new())) } }

    /// The shared registry, configured from the environment on first use.
    pub fn global() -> &'static PoolRegistry { GLOBAL.get_or_init(|| PoolRegistry::new(PoolConfig::from_env())) }

    pub fn config(&self) -> &PoolConfig { &self.config }

    /// Returns the pool for `target`, creating it on first use.
    pub async fn acquire_pool(&self, target: &str) -> Result<PoolHandle, Error> {
        let mut pools = self.pools.lock().await;
        if let Some(handle) = pools.get(target) {
            return Ok(handle.clone());
        }

        let config = tokio_postgres::Config::from_str(target).map_err(|err| Error::InvalidTarget(err.to_string()))?;
        let label = describe(&config);
        let manager = PostgresConnectionManager::new(config, NoTls);
        let failures = ConnectFailures::new(&label);
        let pool = bb8::Pool::builder()
            .max_size(self.config.max_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout)
            .error_sink(Box::new(failures.clone()))
            .build(manager)
            .await
            .map_err(|source| Error::Connection { target: label.clone(), source })?;
        info!("PoolRegistry: created pool for {} (max_size {})", label, self.config.max_size);

        let handle = PoolHandle::new(label, self.config.connection_timeout, pool, failures);
        pools.insert(target.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Releases every pool and forgets it. Returns how many pools were released; a second call returns 0.
    pub async fn release_all(&self) -> usize {
        let mut pools = self.pools.lock().await;
        let released = pools.drain().filter(|(_, handle)| handle.release()).count();
        debug!("PoolRegistry: released {} pool(s)", released);
        released
    }

    pub async fn len(&self) -> usize { self.pools.lock().await.len() }

    pub async fn is_empty(&self) -> bool { self.pools.lock().await.is_empty() }
}

/// `host:port/dbname`, leaving out credentials.
fn describe(config: &tokio_postgres::Config) -> String {
    let host = match config.get_hosts().first() {
        Some(Host::Tcp(host)) => host.clone(),
        #[cfg(unix)]
        Some(Host::Unix(path)) => path.display().to_string(),
        None => "localhost".to_owned(),
    };
    let port = config.get_ports().first().copied().unwrap_or(5432);
    match config.get_dbname() {
        Some(dbname) => format!("{host}:{port}/{dbname}"),
        None => format!("{host}:{port}"),
    }
}
