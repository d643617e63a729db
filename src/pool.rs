//! The session pool: checkout, check-in and drain

use crate::config::{DrainPolicy, PoolOptions, SessionConfig};
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::provider::{SessionProvider, close_session, open_session};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A checked-out session, returned to the pool when dropped
///
/// Dereferences to the provider's session type. Returning it explicitly
/// with [`SessionPool::release`] and simply dropping it are equivalent.
pub struct PooledSession<S> {
    session: Arc<S>,
    id: u64,
    return_fn: Arc<dyn Fn(u64) + Send + Sync>,
}

impl<S> PooledSession<S> {
    fn new(session: Arc<S>, id: u64, return_fn: Arc<dyn Fn(u64) + Send + Sync>) -> Self {
        Self {
            session,
            id,
            return_fn,
        }
    }

    /// Pool-unique identifier of this session
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<S> Deref for PooledSession<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<S> std::fmt::Debug for PooledSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession").field("id", &self.id).finish()
    }
}

impl<S> Drop for PooledSession<S> {
    fn drop(&mut self) {
        (self.return_fn)(self.id);
    }
}

/// How long [`SessionPool::drain_and_close_with`] waits for sessions to come back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTimeout {
    /// Wait until every session is returned
    Forever,

    /// Close everything right away
    Immediate,

    /// Wait at most this long
    After(Duration),
}

impl DrainTimeout {
    /// Negative values wait forever, zero does not wait.
    pub fn from_millis(timeout_ms: i64) -> Self {
        match timeout_ms {
            ms if ms < 0 => DrainTimeout::Forever,
            0 => DrainTimeout::Immediate,
            ms => DrainTimeout::After(Duration::from_millis(ms as u64)),
        }
    }
}

/// Outcome of a drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Every checked-out session came back before the timeout
    pub completed_cleanly: bool,

    /// Sessions still checked out when they were force-closed
    pub forced: usize,

    /// Sessions closed, gracefully or by force
    pub closed: usize,

    /// Sessions that could not be closed even by force
    pub close_failures: usize,

    /// Time from the start of the drain until every close finished
    pub waited: Duration,
}

struct Entry<S> {
    id: u64,
    session: Arc<S>,
}

struct PoolState<S> {
    /// Most recently released last
    idle: Vec<Entry<S>>,
    in_use: HashMap<u64, Arc<S>>,
    /// Slots held by sessions being probed or created outside the lock
    reserved: usize,
    draining: bool,
    /// Bumped by every drain; checkouts started under an older epoch are void
    epoch: u64,
}

impl<S> PoolState<S> {
    fn open_count(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.reserved
    }
}

struct Shared<P: SessionProvider> {
    provider: P,
    config: RwLock<Arc<SessionConfig>>,
    options: PoolOptions,
    state: Mutex<PoolState<P::Session>>,
    /// A session came back or a slot freed up
    available: Notify,
    /// A checked-out session came back
    returned: Notify,
    /// Serializes drains
    drain_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    metrics: MetricsTracker,
}

impl<P: SessionProvider> Shared<P> {
    fn check_in(&self, id: u64) {
        let mut state = self.state.lock();
        match state.in_use.remove(&id) {
            Some(session) => {
                state.idle.push(Entry { id, session });
                drop(state);

                MetricsTracker::incr(&self.metrics.total_released);
                debug!(session_id = id, "Session released");
                self.available.notify_one();
                self.returned.notify_waiters();
            }
            None => trace!(session_id = id, "Ignoring release of untracked session"),
        }
    }
}

/// A slot reserved for a session that is being probed or created.
///
/// Dropping an unsettled checkout gives the slot back and parks any session
/// it holds in the idle set, so an abandoned acquire never loses a session.
/// A doomed session, or one from an older epoch, is closed instead.
struct Checkout<P: SessionProvider> {
    shared: Arc<Shared<P>>,
    epoch: u64,
    entry: Option<Entry<P::Session>>,
    settled: bool,
    /// The session failed its probe and must not go back to idle
    doomed: bool,
}

enum Settled<S> {
    Acquired(Entry<S>),
    /// A drain started; the session went back to idle for it to close
    Parked,
    /// A drain already finished; the session belongs to no one
    Stale(Entry<S>),
}

impl<P: SessionProvider> Checkout<P> {
    fn settle(mut self) -> Settled<P::Session> {
        let Some(entry) = self.entry.take() else {
            return Settled::Parked;
        };

        let mut state = self.shared.state.lock();
        state.reserved -= 1;
        self.settled = true;

        if state.epoch != self.epoch {
            return Settled::Stale(entry);
        }
        if state.draining {
            state.idle.push(entry);
            return Settled::Parked;
        }
        state.in_use.insert(entry.id, Arc::clone(&entry.session));
        Settled::Acquired(entry)
    }
}

impl<P: SessionProvider> Drop for Checkout<P> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let stale = {
            let mut state = self.shared.state.lock();
            state.reserved -= 1;
            match self.entry.take() {
                Some(entry) if !self.doomed && state.epoch == self.epoch => {
                    state.idle.push(entry);
                    None
                }
                other => other,
            }
        };
        self.shared.available.notify_one();

        if let Some(entry) = stale {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    let closed = close_session(&shared.provider, &entry.session).await;
                    shared.metrics.record_close(closed);
                });
            }
        }
    }
}

enum Step<P: SessionProvider> {
    Probe(Checkout<P>),
    Create(Arc<SessionConfig>, Checkout<P>),
    Wait,
}

enum Attempt<S> {
    Acquired(PooledSession<S>),
    /// The idle session failed its probe
    Dead,
    Retry,
}

/// Bounded pool of provider sessions
///
/// Cloning is cheap and yields another handle to the same pool.
///
/// Sessions still idle when the last handle is dropped are not closed
/// through the provider; call [`drain_and_close`](Self::drain_and_close)
/// first for an orderly shutdown.
pub struct SessionPool<P: SessionProvider> {
    shared: Arc<Shared<P>>,
}

impl<P: SessionProvider> Clone for SessionPool<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: SessionProvider> std::fmt::Debug for SessionPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (idle, in_use, draining) = {
            let state = self.shared.state.lock();
            (state.idle.len(), state.in_use.len(), state.draining)
        };
        f.debug_struct("SessionPool")
            .field("config", &*self.config())
            .field("idle", &idle)
            .field("in_use", &in_use)
            .field("draining", &draining)
            .finish()
    }
}

impl<P: SessionProvider> SessionPool<P> {
    /// Create an empty pool with default [`PoolOptions`]
    pub fn new(provider: P, config: SessionConfig) -> Self {
        Self::with_options(provider, config, PoolOptions::default())
    }

    pub fn with_options(provider: P, config: SessionConfig, options: PoolOptions) -> Self {
        debug!(
            server = %config.server,
            port = config.effective_port(),
            max_connections = config.max_connections,
            drain_policy = ?options.drain_policy,
            "Creating session pool"
        );

        Self {
            shared: Arc::new(Shared {
                provider,
                config: RwLock::new(Arc::new(config)),
                options,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    in_use: HashMap::new(),
                    reserved: 0,
                    draining: false,
                    epoch: 0,
                }),
                available: Notify::new(),
                returned: Notify::new(),
                drain_lock: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(1),
                metrics: MetricsTracker::new(),
            }),
        }
    }

    /// Replace the configuration used for future sessions.
    ///
    /// Does not wait for checked-out sessions and does not touch open ones.
    pub fn set_config(&self, config: SessionConfig) {
        debug!(
            server = %config.server,
            max_connections = config.max_connections,
            "Session configuration replaced"
        );
        *self.shared.config.write() = Arc::new(config);
    }

    pub fn config(&self) -> Arc<SessionConfig> {
        Arc::clone(&self.shared.config.read())
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    pub fn provider(&self) -> &P {
        &self.shared.provider
    }

    /// Check out a live session, waiting as long as it takes.
    ///
    /// Idle sessions are reused most-recently-released first and probed
    /// before being handed out. When none is usable and the ceiling allows,
    /// a new session is opened; provider failures are returned as-is.
    /// Otherwise the call waits for a release, re-checking on a capped
    /// linear backoff. Dropping the returned future abandons the wait
    /// without losing any session.
    pub async fn acquire(&self) -> PoolResult<PooledSession<P::Session>> {
        let start = Instant::now();
        let result = self.acquire_inner().await;

        match &result {
            Ok(session) => debug!(
                session_id = session.id(),
                wait_ms = start.elapsed().as_millis() as u64,
                "Acquired session"
            ),
            Err(e) => warn!(
                wait_ms = start.elapsed().as_millis() as u64,
                error = %e,
                "Failed to acquire session"
            ),
        }

        result
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`PoolError::Cancelled`] once `cancel` fires.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> PoolResult<PooledSession<P::Session>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Acquire cancelled");
                Err(PoolError::Cancelled)
            }
            result = self.acquire() => result,
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`PoolError::Timeout`] after `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> PoolResult<PooledSession<P::Session>> {
        tokio::time::timeout(timeout, self.acquire())
            .await
            .map_err(|_| PoolError::Timeout(timeout))?
    }

    /// Return a session to the idle set.
    ///
    /// Sessions the pool no longer tracks, for instance ones force-closed by
    /// a drain, are ignored.
    pub fn release(&self, session: PooledSession<P::Session>) {
        drop(session);
    }

    async fn acquire_inner(&self) -> PoolResult<PooledSession<P::Session>> {
        let mut backoff = self.shared.options.backoff_initial;
        let mut reuse_idle = true;

        loop {
            // Registered before looking at the state so a release that
            // lands in between still wakes us.
            let available = self.shared.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();

            let attempt = match self.plan(reuse_idle)? {
                Step::Probe(checkout) => self.probe(checkout).await,
                Step::Create(config, checkout) => self.create(&config, checkout).await?,
                Step::Wait => {
                    MetricsTracker::incr(&self.shared.metrics.wait_events);
                    trace!(backoff_ms = backoff.as_millis() as u64, "Waiting for a session");
                    tokio::select! {
                        () = &mut available => {}
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = self.shared.options.next_backoff(backoff);
                    Attempt::Retry
                }
            };

            match attempt {
                Attempt::Acquired(session) => {
                    MetricsTracker::incr(&self.shared.metrics.total_acquired);
                    return Ok(session);
                }
                Attempt::Dead => reuse_idle = false,
                Attempt::Retry => reuse_idle = true,
            }
        }
    }

    /// Decide the next move under the lock, reserving a slot for it
    fn plan(&self, reuse_idle: bool) -> PoolResult<Step<P>> {
        let mut state = self.shared.state.lock();

        if state.draining {
            return match self.shared.options.drain_policy {
                DrainPolicy::Reject => Err(PoolError::Draining),
                DrainPolicy::Block => Ok(Step::Wait),
            };
        }

        if reuse_idle {
            if let Some(entry) = state.idle.pop() {
                state.reserved += 1;
                let epoch = state.epoch;
                drop(state);
                return Ok(Step::Probe(self.checkout(epoch, Some(entry))));
            }
        }

        let config = self.config();
        config.validate()?;

        if state.open_count() < config.max_connections {
            state.reserved += 1;
            let epoch = state.epoch;
            drop(state);
            return Ok(Step::Create(config, self.checkout(epoch, None)));
        }

        Ok(Step::Wait)
    }

    fn checkout(&self, epoch: u64, entry: Option<Entry<P::Session>>) -> Checkout<P> {
        Checkout {
            shared: Arc::clone(&self.shared),
            epoch,
            entry,
            settled: false,
            doomed: false,
        }
    }

    async fn probe(&self, mut checkout: Checkout<P>) -> Attempt<P::Session> {
        let probe = match checkout.entry.as_ref() {
            Some(entry) => self.shared.provider.probe(&entry.session).await,
            None => return Attempt::Retry,
        };

        match probe {
            Ok(()) => self.settle(checkout).await,
            Err(err) => {
                MetricsTracker::incr(&self.shared.metrics.probe_failures);
                checkout.doomed = true;
                // The entry stays in the checkout until closed, so an acquire
                // dropped mid-close hands the close over to the checkout.
                if let Some(entry) = checkout.entry.as_ref() {
                    warn!(session_id = entry.id, error = %err, "Idle session failed probe, closing");
                    let closed = close_session(&self.shared.provider, &entry.session).await;
                    self.shared.metrics.record_close(closed);
                }
                checkout.entry = None;
                Attempt::Dead
            }
        }
    }

    async fn create(
        &self,
        config: &SessionConfig,
        mut checkout: Checkout<P>,
    ) -> PoolResult<Attempt<P::Session>> {
        let session = open_session(&self.shared.provider, config).await?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        MetricsTracker::incr(&self.shared.metrics.sessions_created);
        debug!(session_id = id, server = %config.server, "Opened new session");

        checkout.entry = Some(Entry {
            id,
            session: Arc::new(session),
        });
        Ok(self.settle(checkout).await)
    }

    async fn settle(&self, checkout: Checkout<P>) -> Attempt<P::Session> {
        match checkout.settle() {
            Settled::Acquired(entry) => {
                Attempt::Acquired(PooledSession::new(entry.session, entry.id, self.make_return_fn()))
            }
            Settled::Parked => Attempt::Retry,
            Settled::Stale(entry) => {
                debug!(session_id = entry.id, "Closing session opened across a drain");
                let closed = close_session(&self.shared.provider, &entry.session).await;
                self.shared.metrics.record_close(closed);
                Attempt::Retry
            }
        }
    }

    fn make_return_fn(&self) -> Arc<dyn Fn(u64) + Send + Sync> {
        let shared = Arc::downgrade(&self.shared);

        Arc::new(move |id| {
            if let Some(shared) = shared.upgrade() {
                shared.check_in(id);
            }
        })
    }

    /// Pre-open up to `count` idle sessions without exceeding the ceiling.
    ///
    /// Returns how many were opened. Stops at the first provider failure.
    pub async fn warmup(&self, count: usize) -> PoolResult<usize> {
        let mut opened = 0;

        for _ in 0..count {
            let (config, mut checkout) = {
                let mut state = self.shared.state.lock();
                if state.draining {
                    break;
                }
                let config = self.config();
                config.validate()?;
                if state.open_count() >= config.max_connections {
                    break;
                }
                state.reserved += 1;
                let epoch = state.epoch;
                drop(state);
                (config, self.checkout(epoch, None))
            };

            let session = open_session(&self.shared.provider, &config).await?;
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            MetricsTracker::incr(&self.shared.metrics.sessions_created);

            // Dropping the unsettled checkout parks the session in idle.
            checkout.entry = Some(Entry {
                id,
                session: Arc::new(session),
            });
            drop(checkout);
            opened += 1;
        }

        debug!(requested = count, opened, "Warmed up session pool");
        Ok(opened)
    }

    /// Drain the pool, then close every session.
    ///
    /// `timeout_ms < 0` waits for all sessions to be returned, `0` closes
    /// immediately, anything else waits at most that many milliseconds.
    pub async fn drain_and_close(&self, timeout_ms: i64) -> DrainReport {
        self.drain_and_close_with(DrainTimeout::from_millis(timeout_ms)).await
    }

    /// Stop handing out sessions, wait for checked-out ones to come back,
    /// then close everything and reset the pool.
    ///
    /// Sessions still checked out when the wait ends are closed anyway.
    /// The pool accepts acquisitions again once this returns, or if the
    /// returned future is dropped. Once the close phase has started it runs
    /// to completion in the background even if the future is dropped.
    pub async fn drain_and_close_with(&self, timeout: DrainTimeout) -> DrainReport {
        let _serial = self.shared.drain_lock.lock().await;
        let _draining = DrainGuard::engage(&self.shared);
        let start = Instant::now();

        info!(timeout = ?timeout, in_use = self.in_use_count(), "Draining session pool");
        let completed_cleanly = self.wait_for_returns(timeout).await;

        let (idle, in_use) = {
            let mut state = self.shared.state.lock();
            state.epoch += 1;
            let idle = std::mem::take(&mut state.idle);
            let in_use: Vec<_> = state.in_use.drain().collect();
            (idle, in_use)
        };

        if !completed_cleanly {
            warn!(outstanding = in_use.len(), "Drain timed out, forcing sessions closed");
        }

        let forced = in_use.len();
        let sessions: Vec<_> = idle
            .into_iter()
            .rev()
            .map(|entry| (entry.id, entry.session))
            .chain(in_use)
            .collect();
        let total = sessions.len();

        // The sessions are out of the state now; closing them in a task of
        // its own finishes the job even if this future is dropped.
        let closing = tokio::spawn(Self::close_all(Arc::clone(&self.shared), sessions));
        let (closed, close_failures) = closing.await.unwrap_or_else(|err| {
            warn!(error = %err, "Drain close task failed");
            (0, total)
        });

        let report = DrainReport {
            completed_cleanly,
            forced,
            closed,
            close_failures,
            waited: start.elapsed(),
        };
        info!(
            closed = report.closed,
            forced = report.forced,
            close_failures = report.close_failures,
            "Session pool drained"
        );
        report
    }

    /// Close every session, returning how many closed and how many failed
    async fn close_all(shared: Arc<Shared<P>>, sessions: Vec<(u64, Arc<P::Session>)>) -> (usize, usize) {
        let mut closed = 0;
        let mut close_failures = 0;

        for (id, session) in sessions {
            if close_session(&shared.provider, &session).await {
                closed += 1;
                shared.metrics.record_close(true);
            } else {
                close_failures += 1;
                shared.metrics.record_close(false);
                warn!(session_id = id, "Session could not be closed during drain");
            }
        }

        (closed, close_failures)
    }

    async fn wait_for_returns(&self, timeout: DrainTimeout) -> bool {
        let deadline = match timeout {
            DrainTimeout::Forever => None,
            DrainTimeout::Immediate => return self.in_use_count() == 0,
            DrainTimeout::After(limit) => Some(Instant::now() + limit),
        };

        loop {
            let returned = self.shared.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            if self.in_use_count() == 0 {
                return true;
            }

            let mut wait = self.shared.options.drain_poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                wait = wait.min(deadline - now);
            }

            tokio::select! {
                () = &mut returned => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.shared.state.lock().in_use.len()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        let (idle, in_use) = {
            let state = self.shared.state.lock();
            (state.idle.len(), state.in_use.len())
        };
        self.shared
            .metrics
            .get_metrics(in_use, idle, self.config().max_connections)
    }

    /// Export metrics as a string map
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus text format
    #[cfg(feature = "prometheus")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let (idle, in_use, draining) = {
            let state = self.shared.state.lock();
            (state.idle.len(), state.in_use.len(), state.draining)
        };
        HealthStatus::new(idle, in_use, self.config().max_connections, draining)
    }
}

/// Holds the drain flag for the lifetime of a drain
struct DrainGuard<'a, P: SessionProvider> {
    shared: &'a Shared<P>,
}

impl<'a, P: SessionProvider> DrainGuard<'a, P> {
    fn engage(shared: &'a Shared<P>) -> Self {
        shared.state.lock().draining = true;
        Self { shared }
    }
}

impl<P: SessionProvider> Drop for DrainGuard<'_, P> {
    fn drop(&mut self) {
        self.shared.state.lock().draining = false;
        self.shared.available.notify_waiters();
    }
}
