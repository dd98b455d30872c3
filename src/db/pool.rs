//! Per-connection PostgreSQL pool registry.
//!
//! One lazily connected [`PgPool`] per connection profile. The registry is
//! owned by the engine and shut down with it.
//!
//! # Eviction
//!
//! - Creating a pool while `max_pools` pools are live first evicts every
//!   pool idle longer than `idle_threshold`. Creation proceeds even when
//!   nothing could be evicted.
//! - A sweep task runs the same eviction every `sweep_interval`. It holds a
//!   `Weak` reference and exits once the registry is dropped.
//! - Pools with an outstanding [`PoolLease`] are never evicted.
//!
//! Leasing touches the pool while the map lock is held and eviction
//! re-checks under the write lock, so a pool handed out is never closed by
//! a concurrent sweep. Pools are closed outside the lock.

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::ConnectionProfile;

struct PoolEntry {
    pool: PgPool,
    /// std lock: never held across an await.
    last_used: std::sync::RwLock<Instant>,
    created_at: Instant,
    /// Outstanding leases; eviction skips pools with leases.
    active: AtomicUsize,
}

impl PoolEntry {
    fn new(pool: PgPool) -> Self {
        let now = Instant::now();
        Self {
            pool,
            last_used: std::sync::RwLock::new(now),
            created_at: now,
            active: AtomicUsize::new(0),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.write() {
            *last_used = Instant::now();
        }
    }

    fn last_used(&self) -> Instant {
        self.last_used
            .read()
            .map(|guard| *guard)
            .unwrap_or(self.created_at)
    }

    fn is_evictable(&self, now: Instant, idle_threshold: std::time::Duration) -> bool {
        self.active.load(Ordering::Acquire) == 0
            && now.saturating_duration_since(self.last_used()) > idle_threshold
    }
}

/// Borrowed pool. Dropping the lease marks the pool idle again.
pub struct PoolLease {
    entry: Arc<PoolEntry>,
}

impl PoolLease {
    fn new(entry: Arc<PoolEntry>) -> Self {
        entry.active.fetch_add(1, Ordering::AcqRel);
        entry.touch();
        Self { entry }
    }

    pub fn pool(&self) -> &PgPool {
        &self.entry.pool
    }

    /// True when both leases borrow the same pool instance.
    pub fn same_pool(&self, other: &PoolLease) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        let _ = self
            .entry
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
        self.entry.touch();
    }
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease")
            .field("active", &self.entry.active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub struct PoolRegistry {
    settings: PoolSettings,
    pools: RwLock<HashMap<String, Arc<PoolEntry>>>,
    sweep_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PoolRegistry {
    /// Create the registry and start its idle sweep. Must run inside a tokio runtime.
    pub fn new(settings: PoolSettings) -> Arc<Self> {
        let registry = Arc::new(Self {
            settings,
            pools: RwLock::new(HashMap::new()),
            sweep_handle: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&registry);
        let interval = registry.settings.sweep_interval;
        let handle = tokio::spawn(async move {
            Self::sweep_task(weak, interval).await;
        });
        if let Ok(mut guard) = registry.sweep_handle.lock() {
            *guard = Some(handle);
        }

        registry
    }

    /// Lease the pool for `profile`, building it on first use.
    pub async fn get_or_create(&self, profile: &ConnectionProfile) -> EngineResult<PoolLease> {
        if let Some(lease) = self.get_existing(&profile.id).await {
            return Ok(lease);
        }

        let (lease, evicted) = {
            let mut pools = self.pools.write().await;
            // double-check after acquiring the write lock
            if let Some(entry) = pools.get(&profile.id) {
                return Ok(PoolLease::new(Arc::clone(entry)));
            }

            let evicted = if pools.len() >= self.settings.max_pools {
                let evicted = Self::take_idle(&mut pools, self.settings.idle_threshold);
                if evicted.is_empty() {
                    warn!(
                        live = pools.len(),
                        max = self.settings.max_pools,
                        "Pool ceiling reached with nothing idle, creating anyway"
                    );
                }
                evicted
            } else {
                Vec::new()
            };

            let entry = Arc::new(PoolEntry::new(self.build_pool(profile)?));
            pools.insert(profile.id.clone(), Arc::clone(&entry));
            info!(
                connection_id = %profile.id,
                dsn = %profile.masked_dsn(),
                tls = !profile.is_loopback(),
                "Created connection pool"
            );
            (PoolLease::new(entry), evicted)
        };

        Self::close_entries(evicted).await;
        Ok(lease)
    }

    /// Lease an existing pool without creating one.
    pub async fn get_existing(&self, connection_id: &str) -> Option<PoolLease> {
        let pools = self.pools.read().await;
        pools
            .get(connection_id)
            .map(|entry| PoolLease::new(Arc::clone(entry)))
    }

    /// Drop the pool after a connection-level failure so the next request builds a fresh one.
    pub async fn invalidate(&self, connection_id: &str) {
        if self.close(connection_id).await {
            warn!(connection_id, "Discarded connection pool after runtime error");
        }
    }

    /// Remove and close one pool. Returns false when none existed.
    pub async fn close(&self, connection_id: &str) -> bool {
        let removed = self.pools.write().await.remove(connection_id);
        match removed {
            Some(entry) => {
                entry.pool.close().await;
                debug!(connection_id, "Closed connection pool");
                true
            }
            None => false,
        }
    }

    /// Stop the sweep task and close every pool.
    pub async fn close_all(&self) {
        if let Some(handle) = self.sweep_handle.lock().ok().and_then(|mut guard| guard.take()) {
            handle.abort();
        }

        let drained: Vec<_> = self.pools.write().await.drain().collect();
        for (id, entry) in drained {
            info!(connection_id = %id, "Closing connection pool");
            entry.pool.close().await;
        }
    }

    /// Evict every idle pool now. Returns the number closed.
    pub async fn evict_idle(&self) -> usize {
        let evicted = {
            let mut pools = self.pools.write().await;
            Self::take_idle(&mut pools, self.settings.idle_threshold)
        };
        let count = evicted.len();
        Self::close_entries(evicted).await;
        count
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn contains(&self, connection_id: &str) -> bool {
        self.pools.read().await.contains_key(connection_id)
    }

    fn build_pool(&self, profile: &ConnectionProfile) -> EngineResult<PgPool> {
        if profile.host.is_empty() || profile.database.is_empty() {
            return Err(EngineError::connection(
                format!("Connection '{}' has no host or database", profile.id),
                "Recreate the connection with a host and database name",
            ));
        }
        let ssl_mode = if profile.is_loopback() {
            PgSslMode::Disable
        } else {
            PgSslMode::Require
        };
        let options = PgConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .database(&profile.database)
            .username(&profile.username)
            .password(&profile.password)
            .ssl_mode(ssl_mode)
            .options([("default_transaction_read_only", "on")]);

        Ok(PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .idle_timeout(Some(self.settings.connection_idle_timeout))
            .connect_lazy_with(options))
    }

    /// Remove idle entries under the caller's write lock.
    fn take_idle(
        pools: &mut HashMap<String, Arc<PoolEntry>>,
        idle_threshold: std::time::Duration,
    ) -> Vec<(String, Arc<PoolEntry>)> {
        let now = Instant::now();
        let idle: Vec<String> = pools
            .iter()
            .filter(|(_, entry)| entry.is_evictable(now, idle_threshold))
            .map(|(id, _)| id.clone())
            .collect();
        idle.into_iter()
            .filter_map(|id| pools.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    async fn close_entries(entries: Vec<(String, Arc<PoolEntry>)>) {
        for (id, entry) in entries {
            info!(connection_id = %id, "Evicting idle connection pool");
            entry.pool.close().await;
        }
    }

    async fn sweep_task(weak: Weak<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            let Some(registry) = weak.upgrade() else {
                debug!("Pool registry dropped, sweep task exiting");
                return;
            };
            let evicted = registry.evict_idle().await;
            if evicted > 0 {
                debug!(evicted, "Idle pool sweep");
            }
            drop(registry);
        }
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_handle.lock().ok().and_then(|mut guard| guard.take()) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// True for driver errors that mean the pool itself is unusable.
pub fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed
    )
}

/// Map a failure to reach the target database into a connection error.
pub fn connect_error(profile: &ConnectionProfile, error: &sqlx::Error) -> EngineError {
    EngineError::connection(
        format!("Cannot reach {}: {}", profile.masked_dsn(), error),
        connection_suggestion(error),
    )
}

/// Hint for common connection failures.
pub fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the PostgreSQL server is running and accessible".to_string();
    }
    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password of the connection".to_string();
    }
    if error_str.contains("does not exist") {
        return "Check that the database name exists".to_string();
    }
    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Non-loopback hosts require TLS; check that the server accepts SSL connections"
            .to_string();
    }
    if matches!(error, sqlx::Error::PoolTimedOut) {
        return "The server did not answer in time; check the host and port".to_string();
    }
    "Verify the host, port and database of the connection".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewConnection;
    use std::time::Duration;

    fn profile(id: &str) -> ConnectionProfile {
        ConnectionProfile::new(
            id,
            NewConnection {
                owner_id: "u".into(),
                name: id.into(),
                host: "127.0.0.1".into(),
                port: Some(1),
                database: "db".into(),
                username: "app".into(),
                password: "pw".into(),
            },
        )
        .unwrap()
    }

    fn settings(max_pools: usize) -> PoolSettings {
        PoolSettings {
            max_pools,
            ..PoolSettings::default()
        }
    }

    #[test]
    fn test_connection_error_classes() {
        assert!(is_connection_error(&sqlx::Error::PoolTimedOut));
        assert!(is_connection_error(&sqlx::Error::PoolClosed));
        assert!(!is_connection_error(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_connection_suggestion() {
        let refused = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused",
        ));
        assert!(connection_suggestion(&refused).contains("running"));
        assert!(connection_suggestion(&sqlx::Error::PoolTimedOut).contains("in time"));

        let err = connect_error(&profile("a"), &refused);
        assert!(matches!(err, EngineError::Connection { .. }));
        assert!(!err.to_string().contains("pw"));
    }

    #[tokio::test]
    async fn test_same_id_returns_same_pool() {
        let registry = PoolRegistry::new(settings(10));
        let a = registry.get_or_create(&profile("a")).await.unwrap();
        let b = registry.get_or_create(&profile("a")).await.unwrap();
        assert!(a.same_pool(&b));
        assert_eq!(registry.pool_count().await, 1);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_get_existing_never_creates() {
        let registry = PoolRegistry::new(settings(10));
        assert!(registry.get_existing("missing").await.is_none());
        assert_eq!(registry.pool_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_removes_pool() {
        let registry = PoolRegistry::new(settings(10));
        drop(registry.get_or_create(&profile("a")).await.unwrap());
        assert!(registry.close("a").await);
        assert!(!registry.contains("a").await);
        assert!(!registry.close("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_evicts_idle_pools() {
        let registry = PoolRegistry::new(settings(2));
        drop(registry.get_or_create(&profile("old")).await.unwrap());
        tokio::time::advance(Duration::from_secs(300)).await;
        drop(registry.get_or_create(&profile("recent")).await.unwrap());
        tokio::time::advance(Duration::from_secs(301)).await;

        // "old" idle 601s, "recent" idle 301s
        drop(registry.get_or_create(&profile("new")).await.unwrap());

        assert!(!registry.contains("old").await);
        assert!(registry.contains("recent").await);
        assert!(registry.contains("new").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_without_idle_pools_still_creates() {
        let registry = PoolRegistry::new(settings(1));
        drop(registry.get_or_create(&profile("a")).await.unwrap());
        drop(registry.get_or_create(&profile("b")).await.unwrap());
        assert_eq!(registry.pool_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leased_pool_is_not_evicted() {
        let registry = PoolRegistry::new(settings(10));
        let lease = registry.get_or_create(&profile("busy")).await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(registry.evict_idle().await, 0);
        drop(lease);
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(registry.evict_idle().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_evicts_idle_pools() {
        let registry = PoolRegistry::new(settings(10));
        drop(registry.get_or_create(&profile("a")).await.unwrap());

        // first sweep at 300s: idle 300s, kept
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(registry.contains("a").await);

        // second sweep at 600s: still not over the threshold
        // third sweep at 900s: idle 900s, evicted
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(!registry.contains("a").await);
    }
}
