//! Connection pooling for mywire sessions.
//!
//! A [`ConnectionPool`] hands out [`PooledSession`]s that go back to the
//! pool when dropped. Idle sessions are validated before reuse and replaced
//! when they turn out to be dead. A [`PoolRegistry`] keeps one pool per
//! distinct connection string; it is an ordinary value owned by the
//! application, so separate registries never share sessions.

use asupersync::{Cx, Outcome};
use mywire::{MySqlConfig, MySqlSession};
use mywire_core::Error;
use mywire_core::error::{PoolError, PoolErrorKind};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle sessions kept regardless of `idle_timeout`
    pub min_idle: usize,
    /// Maximum sessions (idle + in use)
    pub max_size: usize,
    /// Idle sessions beyond `min_idle` are evicted after this long
    pub idle_timeout: Duration,
    /// Every idle session is evicted after this long
    pub max_idle_time: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_size: 100,
            idle_timeout: Duration::from_secs(180),
            max_idle_time: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    pub fn min_idle(mut self, n: usize) -> Self {
        self.min_idle = n;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_idle_time(mut self, timeout: Duration) -> Self {
        self.max_idle_time = timeout;
        self
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions waiting in the pool
    pub idle: usize,
    /// Sessions currently handed out (or being opened)
    pub in_use: usize,
    /// Sessions opened over the pool's lifetime
    pub created: u64,
    /// Sessions dropped because they were dead, broken or evicted
    pub discarded: u64,
}

/// Opens and checks the sessions a pool manages.
pub trait SessionManager: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Open a new session.
    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Session, Error>> + Send;

    /// Check that an idle session is still usable before handing it out.
    fn validate(
        &self,
        cx: &Cx,
        session: &mut Self::Session,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Whether a returned session must be discarded instead of reused.
    fn has_broken(&self, _session: &Self::Session) -> bool {
        false
    }
}

/// Manager for plain TCP MySQL sessions.
#[derive(Debug, Clone)]
pub struct MySqlSessionManager {
    config: Arc<MySqlConfig>,
}

impl MySqlSessionManager {
    pub fn new(config: MySqlConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }
}

impl SessionManager for MySqlSessionManager {
    type Session = MySqlSession;

    async fn connect(&self, cx: &Cx) -> Outcome<MySqlSession, Error> {
        MySqlSession::connect(cx, Arc::clone(&self.config)).await
    }

    /// Reset the session; servers that refuse the reset are pinged instead.
    async fn validate(&self, cx: &Cx, session: &mut MySqlSession) -> Outcome<(), Error> {
        if !session.is_ready() {
            return Outcome::Err(Error::Pool(PoolError {
                kind: PoolErrorKind::Closed,
                message: "idle session is no longer ready".to_string(),
                source: None,
            }));
        }
        match session.reset_connection(cx).await {
            Outcome::Err(e) if !e.is_fatal() => {
                tracing::debug!(error = %e, "reset-connection refused; falling back to ping");
                session.ping(cx).await
            }
            other => other,
        }
    }

    fn has_broken(&self, session: &MySqlSession) -> bool {
        !session.is_ready() || session.has_pending_results()
    }
}

struct IdleSession<S> {
    session: S,
    idle_since: Instant,
}

struct PoolState<S> {
    /// Oldest first
    idle: VecDeque<IdleSession<S>>,
    in_use: usize,
    created: u64,
    discarded: u64,
    closed: bool,
}

struct PoolInner<M: SessionManager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Session>>,
}

impl<M: SessionManager> PoolInner<M> {
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Session>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back(&self, session: M::Session) {
        let broken = self.manager.has_broken(&session);
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if broken || state.closed {
            state.discarded += 1;
            tracing::debug!(broken, "session discarded on release");
            return;
        }
        state.idle.push_back(IdleSession {
            session,
            idle_since: Instant::now(),
        });
    }

    fn forget_one(&self, discarded: bool) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if discarded {
            state.discarded += 1;
        }
    }
}

enum Checkout<S> {
    Reuse(S),
    Open,
}

/// A pool of sessions created by one [`SessionManager`].
///
/// Cloning is cheap; clones share the same sessions.
pub struct ConnectionPool<M: SessionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: SessionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: SessionManager> std::fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<M: SessionManager> ConnectionPool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                manager,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: 0,
                    created: 0,
                    discarded: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use,
            created: state.created,
            discarded: state.discarded,
        }
    }

    /// Check if the pool is at capacity.
    pub fn at_capacity(&self) -> bool {
        let state = self.inner.lock();
        state.idle.len() + state.in_use >= self.inner.config.max_size
    }

    /// Borrow a session, reusing a validated idle one when possible.
    ///
    /// Idle sessions that fail validation are discarded and the next one
    /// is tried; when none are left a new session is opened. A pool at
    /// `max_size` fails with a retryable [`PoolErrorKind::Exhausted`].
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledSession<M>, Error> {
        loop {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }
            let checkout = match self.checkout(Instant::now()) {
                Ok(checkout) => checkout,
                Err(e) => return Outcome::Err(e),
            };
            match checkout {
                Checkout::Reuse(mut session) => {
                    match self.inner.manager.validate(cx, &mut session).await {
                        Outcome::Ok(()) => {
                            tracing::debug!("pool acquire: reused idle session");
                            return Outcome::Ok(self.wrap(session));
                        }
                        Outcome::Err(e) => {
                            tracing::debug!(error = %e, "idle session failed validation");
                            self.inner.forget_one(true);
                        }
                        Outcome::Cancelled(r) => {
                            self.inner.forget_one(true);
                            return Outcome::Cancelled(r);
                        }
                        Outcome::Panicked(p) => {
                            self.inner.forget_one(true);
                            return Outcome::Panicked(p);
                        }
                    }
                }
                Checkout::Open => {
                    return match self.inner.manager.connect(cx).await {
                        Outcome::Ok(session) => {
                            self.inner.lock().created += 1;
                            tracing::debug!("pool acquire: opened new session");
                            Outcome::Ok(self.wrap(session))
                        }
                        Outcome::Err(e) => {
                            self.inner.forget_one(false);
                            Outcome::Err(e)
                        }
                        Outcome::Cancelled(r) => {
                            self.inner.forget_one(false);
                            Outcome::Cancelled(r)
                        }
                        Outcome::Panicked(p) => {
                            self.inner.forget_one(false);
                            Outcome::Panicked(p)
                        }
                    };
                }
            }
        }
    }

    /// Reserve a slot: the newest idle session that has not outlived
    /// `max_idle_time`, or permission to open one.
    fn checkout(&self, now: Instant) -> Result<Checkout<M::Session>, Error> {
        let max_idle_time = self.inner.config.max_idle_time;
        let mut state = self.inner.lock();
        if state.closed {
            return Err(pool_error(PoolErrorKind::Closed, "pool is closed"));
        }
        while let Some(entry) = state.idle.pop_back() {
            if now.saturating_duration_since(entry.idle_since) >= max_idle_time {
                state.discarded += 1;
                continue;
            }
            state.in_use += 1;
            return Ok(Checkout::Reuse(entry.session));
        }
        if state.in_use >= self.inner.config.max_size {
            return Err(pool_error(
                PoolErrorKind::Exhausted,
                format!("pool exhausted ({} sessions in use)", state.in_use),
            ));
        }
        state.in_use += 1;
        Ok(Checkout::Open)
    }

    fn wrap(&self, session: M::Session) -> PooledSession<M> {
        PooledSession {
            session: Some(session),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Evict idle sessions that have waited too long as of `now`.
    ///
    /// Every session idle for `max_idle_time` goes; beyond `min_idle`,
    /// sessions idle for `idle_timeout` go as well. Returns the number
    /// evicted.
    pub fn reap(&self, now: Instant) -> usize {
        let config = &self.inner.config;
        let mut state = self.inner.lock();
        let before = state.idle.len();
        state
            .idle
            .retain(|entry| now.saturating_duration_since(entry.idle_since) < config.max_idle_time);
        while state.idle.len() > config.min_idle {
            let expired = state.idle.front().is_some_and(|entry| {
                now.saturating_duration_since(entry.idle_since) >= config.idle_timeout
            });
            if !expired {
                break;
            }
            state.idle.pop_front();
        }
        let evicted = before - state.idle.len();
        state.discarded += evicted as u64;
        if evicted > 0 {
            tracing::debug!(evicted, idle = state.idle.len(), "pool eviction");
        }
        evicted
    }

    /// Drop every idle session and refuse further acquires. Sessions still
    /// in use are discarded when they come back.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        state.closed = true;
        let dropped = state.idle.len();
        state.idle.clear();
        state.discarded += dropped as u64;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

fn pool_error(kind: PoolErrorKind, message: impl Into<String>) -> Error {
    Error::Pool(PoolError {
        kind,
        message: message.into(),
        source: None,
    })
}

/// A session borrowed from a pool.
///
/// Returned to the pool on drop unless the manager reports it broken.
pub struct PooledSession<M: SessionManager> {
    session: Option<M::Session>,
    pool: Arc<PoolInner<M>>,
}

impl<M: SessionManager> PooledSession<M> {
    /// Return the session to the pool now.
    pub fn release(self) {
        drop(self);
    }

    /// Drop the session instead of returning it.
    pub fn discard(mut self) {
        if self.session.take().is_some() {
            self.pool.forget_one(true);
        }
    }

    /// Take the session out of the pool's accounting for good.
    pub fn detach(mut self) -> Option<M::Session> {
        let session = self.session.take();
        if session.is_some() {
            self.pool.forget_one(false);
        }
        session
    }
}

impl<M: SessionManager> std::ops::Deref for PooledSession<M> {
    type Target = M::Session;

    fn deref(&self) -> &Self::Target {
        match &self.session {
            Some(session) => session,
            None => unreachable!("pooled session used after release"),
        }
    }
}

impl<M: SessionManager> std::ops::DerefMut for PooledSession<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!("pooled session used after release"),
        }
    }
}

impl<M: SessionManager> Drop for PooledSession<M> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.give_back(session);
        }
    }
}

/// Pools keyed by exact connection-string equality.
///
/// Strings that differ only in spacing or key order get separate pools.
pub struct PoolRegistry<M: SessionManager> {
    config: PoolConfig,
    pools: Mutex<HashMap<String, ConnectionPool<M>>>,
}

impl<M: SessionManager> std::fmt::Debug for PoolRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("config", &self.config)
            .field("pools", &self.len())
            .finish()
    }
}

impl<M: SessionManager> PoolRegistry<M> {
    /// New registry whose pools all use `config`.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionPool<M>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The pool for `key`, created with `make_manager` on first use.
    pub fn get_or_create<F>(&self, key: &str, make_manager: F) -> Result<ConnectionPool<M>, Error>
    where
        F: FnOnce() -> Result<M, Error>,
    {
        let mut pools = self.lock();
        if let Some(pool) = pools.get(key) {
            return Ok(pool.clone());
        }
        let pool = ConnectionPool::new(make_manager()?, self.config.clone());
        pools.insert(key.to_string(), pool.clone());
        tracing::debug!(pools = pools.len(), "pool created");
        Ok(pool)
    }

    pub fn get(&self, key: &str) -> Option<ConnectionPool<M>> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Reap every pool.
    pub fn reap(&self, now: Instant) -> usize {
        self.lock().values().map(|pool| pool.reap(now)).sum()
    }

    /// Close and forget every pool.
    pub fn clear(&self) {
        for (_, pool) in self.lock().drain() {
            pool.close();
        }
    }
}

impl PoolRegistry<MySqlSessionManager> {
    /// The pool for a connection string, parsing it on first use.
    pub fn pool(&self, connection_string: &str) -> Result<ConnectionPool<MySqlSessionManager>, Error> {
        self.get_or_create(connection_string, || {
            connection_string
                .parse::<MySqlConfig>()
                .map(MySqlSessionManager::new)
        })
    }
}

/// Registry of MySQL pools.
pub type MySqlPoolRegistry = PoolRegistry<MySqlSessionManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Debug)]
    struct FakeSession {
        id: u32,
        broken: bool,
    }

    #[derive(Debug, Default)]
    struct FakeManager {
        next_id: AtomicU32,
        reject_validation: AtomicBool,
        validations: AtomicU32,
    }

    impl SessionManager for Arc<FakeManager> {
        type Session = FakeSession;

        async fn connect(&self, _cx: &Cx) -> Outcome<FakeSession, Error> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Outcome::Ok(FakeSession { id, broken: false })
        }

        async fn validate(&self, _cx: &Cx, _session: &mut FakeSession) -> Outcome<(), Error> {
            self.validations.fetch_add(1, Ordering::SeqCst);
            if self.reject_validation.load(Ordering::SeqCst) {
                Outcome::Err(pool_error(PoolErrorKind::Closed, "dead"))
            } else {
                Outcome::Ok(())
            }
        }

        fn has_broken(&self, session: &FakeSession) -> bool {
            session.broken
        }
    }

    fn run<F: Future>(test: impl FnOnce(Cx) -> F) -> F::Output {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(test(Cx::for_testing()))
    }

    fn acquired<M: SessionManager>(outcome: Outcome<PooledSession<M>, Error>) -> PooledSession<M> {
        match outcome {
            Outcome::Ok(session) => session,
            Outcome::Err(e) => panic!("acquire failed: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    fn pool(config: PoolConfig) -> (ConnectionPool<Arc<FakeManager>>, Arc<FakeManager>) {
        let manager = Arc::new(FakeManager::default());
        (ConnectionPool::new(Arc::clone(&manager), config), manager)
    }

    #[test]
    fn test_config_defaults() {
        let config = PoolConfig::new(5)
            .min_idle(2)
            .idle_timeout(Duration::from_secs(30));
        assert_eq!(config.max_size, 5);
        assert_eq!(config.min_idle, 2);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_idle_time, Duration::from_secs(600));
    }

    #[test]
    fn test_released_session_is_reused_after_validation() {
        let (pool, manager) = pool(PoolConfig::new(2));
        run(|cx| async move {
            let first = acquired(pool.acquire(&cx).await);
            assert_eq!(first.id, 0);
            assert_eq!(pool.stats().in_use, 1);
            first.release();
            assert_eq!(pool.stats(), PoolStats { idle: 1, in_use: 0, created: 1, discarded: 0 });

            let again = acquired(pool.acquire(&cx).await);
            assert_eq!(again.id, 0);
            assert_eq!(manager.validations.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_dead_idle_session_is_replaced() {
        let (pool, manager) = pool(PoolConfig::new(2));
        run(|cx| async move {
            drop(acquired(pool.acquire(&cx).await));
            manager.reject_validation.store(true, Ordering::SeqCst);
            let session = acquired(pool.acquire(&cx).await);
            assert_eq!(session.id, 1);
            let stats = pool.stats();
            assert_eq!(stats.created, 2);
            assert_eq!(stats.discarded, 1);
            assert_eq!(stats.in_use, 1);
        });
    }

    #[test]
    fn test_broken_session_is_not_returned() {
        let (pool, _manager) = pool(PoolConfig::new(2));
        run(|cx| async move {
            let mut session = acquired(pool.acquire(&cx).await);
            session.broken = true;
            drop(session);
            let stats = pool.stats();
            assert_eq!(stats.idle, 0);
            assert_eq!(stats.in_use, 0);
            assert_eq!(stats.discarded, 1);
        });
    }

    #[test]
    fn test_full_pool_is_exhausted() {
        let (pool, _manager) = pool(PoolConfig::new(1));
        run(|cx| async move {
            let held = acquired(pool.acquire(&cx).await);
            assert!(pool.at_capacity());
            let Outcome::Err(err) = pool.acquire(&cx).await else {
                panic!("expected exhaustion");
            };
            assert!(matches!(err, Error::Pool(ref p) if p.kind == PoolErrorKind::Exhausted));
            assert!(err.is_retryable());
            drop(held);
            assert!(matches!(pool.acquire(&cx).await, Outcome::Ok(_)));
        });
    }

    #[test]
    fn test_detach_and_discard_free_slots() {
        let (pool, _manager) = pool(PoolConfig::new(2));
        run(|cx| async move {
            let a = acquired(pool.acquire(&cx).await);
            let b = acquired(pool.acquire(&cx).await);
            let owned = a.detach();
            assert!(owned.is_some());
            b.discard();
            let stats = pool.stats();
            assert_eq!(stats.in_use, 0);
            assert_eq!(stats.idle, 0);
            assert_eq!(stats.discarded, 1);
        });
    }

    #[test]
    fn test_reap_respects_min_idle_and_max_idle_time() {
        let config = PoolConfig::new(4)
            .min_idle(1)
            .idle_timeout(Duration::from_secs(10))
            .max_idle_time(Duration::from_secs(60));
        let (pool, _manager) = pool(config);
        run(|cx| async move {
            let mut held = Vec::new();
            for _ in 0..3 {
                held.push(acquired(pool.acquire(&cx).await));
            }
            drop(held);
            let released = Instant::now();

            assert_eq!(pool.reap(released), 0);
            // Past idle_timeout: only min_idle survive.
            assert_eq!(pool.reap(released + Duration::from_secs(11)), 2);
            assert_eq!(pool.stats().idle, 1);
            // Past max_idle_time: nothing survives.
            assert_eq!(pool.reap(released + Duration::from_secs(61)), 1);
            assert_eq!(pool.stats().idle, 0);
            assert_eq!(pool.stats().discarded, 3);
        });
    }

    #[test]
    fn test_closed_pool_rejects_acquire() {
        let (pool, _manager) = pool(PoolConfig::new(2));
        run(|cx| async move {
            let held = acquired(pool.acquire(&cx).await);
            pool.close();
            assert!(pool.is_closed());
            assert!(matches!(
                pool.acquire(&cx).await,
                Outcome::Err(Error::Pool(ref p)) if p.kind == PoolErrorKind::Closed
            ));
            drop(held);
            assert_eq!(pool.stats().idle, 0);
        });
    }

    #[test]
    fn test_registry_keys_by_exact_string() {
        let registry: PoolRegistry<Arc<FakeManager>> = PoolRegistry::new(PoolConfig::new(3));
        let manager = Arc::new(FakeManager::default());
        let a = registry
            .get_or_create("Server=db;User=app", || Ok(Arc::clone(&manager)))
            .unwrap();
        let again = registry
            .get_or_create("Server=db;User=app", || panic!("pool should be reused"))
            .unwrap();
        assert!(Arc::ptr_eq(&a.inner, &again.inner));
        registry
            .get_or_create("Server=db; User=app", || Ok(Arc::clone(&manager)))
            .unwrap();
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert!(a.is_closed());
    }

    #[test]
    fn test_registries_are_independent() {
        let first = MySqlPoolRegistry::new(PoolConfig::default());
        let second = MySqlPoolRegistry::new(PoolConfig::default());
        let key = "Server=localhost;User ID=app;Password=secret";
        let pool = first.pool(key).unwrap();
        assert_eq!(pool.manager().config().user, "app");
        assert!(second.get(key).is_none());
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_registry_rejects_bad_connection_string() {
        let registry = MySqlPoolRegistry::new(PoolConfig::default());
        assert!(registry.pool("not a pair").is_err());
        assert!(registry.is_empty());
    }
}
