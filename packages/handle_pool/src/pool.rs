//! Pool management and lifecycle.
//!
//! There are two locks in a pool:
//!
//! 1. The concurrency lock gates the handle set as a whole. Acquisitions, releases and purges
//!    hold it shared while they touch the handle set. [`HandlePool::blockade()`] and
//!    [`HandlePool::unblockade()`] hold it exclusively while flipping the blockade flag.
//! 2. The memory lock protects the config set and the handle bookkeeping.
//!
//! Concurrency is always locked before memory. The idle list has its own mutex so that the
//! handles in it only need to be `Send`; it is only ever locked while memory is held.

use std::any::type_name;
use std::fmt;
use std::mem;
use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use event_listener::{Event, Listener};
use foldhash::{HashSet, HashSetExt};
use parking_lot::{Mutex, RwLock};
use scopeguard::ScopeGuard;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::handle::HandleFactory;
use crate::metrics::{
    CONFIG_APPLY_TIME_MS, DRAIN_WAIT_TIME_MS, FLOW_OUT_FAILURES, HANDLES_CREATED,
    HANDLES_DESTROYED,
};
use crate::{
    BoxError, Config, ConfigSet, ConfiguredHandle, Error, Handle, HandleId, Priority,
    RecyclableHandle, error_sink, max_concurrency,
};

struct MemoryState<H> {
    configs: Arc<ConfigSet<H>>,

    // Every live handle, whether checked out or idle. A handle that is being created is
    // already in here, so it occupies a concurrency slot.
    handles: HashSet<HandleId>,
}

enum Acquired<H> {
    Idle(ConfiguredHandle<H>),
    Reserved(HandleId),
}

pub(crate) struct PoolInner<H>
where
    H: Handle,
{
    path: String,
    factory: Box<HandleFactory<H>>,
    max_concurrency: NonZero<usize>,

    concurrency: RwLock<()>,
    // Only written while `concurrency` is held exclusively.
    blockaded: AtomicBool,

    memory: RwLock<MemoryState<H>>,
    // Most recently released handle last. Only locked while `memory` is held.
    frees: Mutex<Vec<ConfiguredHandle<H>>>,

    // Notified whenever the number of checked-out handles drops to zero.
    drained: Event,
    next_handle_id: AtomicU64,
}

impl<H> fmt::Debug for PoolInner<H>
where
    H: Handle,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("path", &self.path)
            .field("max_concurrency", &self.max_concurrency)
            .field("blockaded", &self.blockaded.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<H> PoolInner<H>
where
    H: Handle,
{
    fn flow_out(self: &Arc<Self>) -> Result<RecyclableHandle<H>> {
        let (acquired, mut configs) = self.take_or_reserve()?;

        let configured = match acquired {
            Acquired::Idle(configured) => configured,
            Acquired::Reserved(id) => {
                // Gives the slot back unless a handle comes out, also if the factory panics.
                let reservation = scopeguard::guard(id, |id| self.forget(id));
                let configured = self.generate(id)?;
                ScopeGuard::into_inner(reservation);
                configured
            }
        };

        // Destroys the handle unless it is dispensed, also if a config step panics.
        let mut configured = scopeguard::guard(configured, |configured| self.destroy(configured));

        // The configs may be replaced while we apply them, in which case we catch up.
        while configured.is_stale(&configs) {
            let outcome = CONFIG_APPLY_TIME_MS
                .with(|event| event.observe_duration_millis(|| configured.configure(&configs)));

            if let Err((config, source)) = outcome {
                return Err(Error::Configuration {
                    path: self.path.clone(),
                    config,
                    source,
                });
            }

            trace!(
                path = %self.path,
                handle_id = %configured.id(),
                version = configs.version(),
                "configured handle"
            );

            configs = self.current_configs();
        }

        let configured = ScopeGuard::into_inner(configured);

        trace!(path = %self.path, handle_id = %configured.id(), "handle flowed out");

        Ok(RecyclableHandle::new(configured, Arc::downgrade(self)))
    }

    fn current_configs(&self) -> Arc<ConfigSet<H>> {
        Arc::clone(&self.memory.read().configs)
    }

    /// Pops an idle handle or reserves a slot for a new one.
    ///
    /// Also returns the config set the handle must be configured against.
    fn take_or_reserve(&self) -> Result<(Acquired<H>, Arc<ConfigSet<H>>)> {
        let _concurrency = self.concurrency.read();

        // Acquire ordering synchronizes with the Release in blockade().
        if self.blockaded.load(Ordering::Acquire) {
            return Err(Error::Blockaded {
                path: self.path.clone(),
            });
        }

        let mut memory = self.memory.write();
        let configs = Arc::clone(&memory.configs);

        if let Some(configured) = self.frees.lock().pop() {
            return Ok((Acquired::Idle(configured), configs));
        }

        if self.checked_out_count(&memory) >= self.max_concurrency.get() {
            return Err(Error::CapacityExceeded {
                path: self.path.clone(),
                max_concurrency: self.max_concurrency.get(),
            });
        }

        let id = HandleId::new(self.next_handle_id.fetch_add(1, Ordering::Relaxed));
        memory.handles.insert(id);

        Ok((Acquired::Reserved(id), configs))
    }

    /// Creates and opens a handle for a reserved slot.
    ///
    /// The caller releases the slot if this fails.
    fn generate(&self, id: HandleId) -> Result<ConfiguredHandle<H>> {
        let handle = (self.factory)()
            .and_then(|mut handle| {
                handle.open()?;
                Ok(handle)
            })
            .map_err(|source| Error::Creation {
                path: self.path.clone(),
                source,
            })?;

        HANDLES_CREATED.with(|event| event.observe_once());
        debug!(path = %self.path, handle_id = %id, "created handle");

        Ok(ConfiguredHandle::new(id, handle))
    }

    /// Returns a checked-out handle to the idle list, or destroys it if the pool is blockaded.
    pub(crate) fn flow_back(&self, configured: ConfiguredHandle<H>) {
        let id = configured.id();

        let (rejected, drained) = {
            let _concurrency = self.concurrency.read();
            let memory = self.memory.write();

            assert!(
                memory.handles.contains(&id),
                "handle {id} was returned to a pool that does not track it"
            );

            if self.blockaded.load(Ordering::Acquire) {
                (Some(configured), false)
            } else {
                let mut frees = self.frees.lock();

                debug_assert!(
                    frees.iter().all(|idle| idle.id() != id),
                    "handle {id} was returned to the pool twice"
                );

                frees.push(configured);
                drop(frees);

                (None, self.checked_out_count(&memory) == 0)
            }
        };

        if let Some(configured) = rejected {
            self.destroy(configured);
        } else {
            trace!(path = %self.path, handle_id = %id, "handle flowed back");
        }

        if drained {
            self.drained.notify(usize::MAX);
        }
    }

    /// Closes a handle that is not in the idle list and stops tracking it.
    pub(crate) fn destroy(&self, configured: ConfiguredHandle<H>) {
        let id = configured.id();

        // Close before forgetting, so a drain cannot observe zero checked-out handles while
        // this one is still open.
        configured.close();
        HANDLES_DESTROYED.with(|event| event.observe_once());
        debug!(path = %self.path, handle_id = %id, "destroyed handle");

        self.forget(id);
    }

    fn forget(&self, id: HandleId) {
        let drained = {
            let mut memory = self.memory.write();
            memory.handles.remove(&id);
            self.checked_out_count(&memory) == 0
        };

        if drained {
            self.drained.notify(usize::MAX);
        }
    }

    fn purge(&self) -> usize {
        let idle = {
            let _concurrency = self.concurrency.read();
            let mut memory = self.memory.write();

            let idle = mem::take(&mut *self.frees.lock());
            for configured in &idle {
                memory.handles.remove(&configured.id());
            }

            idle
        };

        let count = idle.len();

        for configured in idle {
            configured.close();
            HANDLES_DESTROYED.with(|event| event.observe_once());
        }

        if count > 0 {
            debug!(path = %self.path, count, "purged idle handles");
        }

        count
    }

    fn checked_out_count(&self, memory: &MemoryState<H>) -> usize {
        let idle = self.frees.lock().len();

        memory
            .handles
            .len()
            .checked_sub(idle)
            .expect("idle handles are always a subset of the tracked handles")
    }

    fn alive_handle_count(&self) -> usize {
        let memory = self.memory.read();
        self.checked_out_count(&memory)
    }

    fn blockade(&self) {
        let _concurrency = self.concurrency.write();

        // Release ordering pairs with the Acquire loads in take_or_reserve() and flow_back().
        self.blockaded.store(true, Ordering::Release);
        debug!(path = %self.path, "blockaded");
    }

    fn unblockade(&self) {
        let _concurrency = self.concurrency.write();

        self.blockaded.store(false, Ordering::Release);
        debug!(path = %self.path, "unblockaded");
    }

    fn is_blockaded(&self) -> bool {
        let _concurrency = self.concurrency.read();
        self.blockaded.load(Ordering::Acquire)
    }

    #[cfg_attr(test, mutants::skip)] // Mutations cause timeouts (drains never finish).
    fn wait_until_drained(&self) {
        loop {
            let listener = self.drained.listen();

            // Re-check after registering the listener to avoid lost wakeups.
            if self.alive_handle_count() == 0 {
                return;
            }

            listener.wait();
        }
    }
}

/// A bounded pool of lazily created resource handles, such as database connections.
///
/// Handles are checked out with [`flow_out()`][Self::flow_out] and come back to the pool
/// when the returned [`RecyclableHandle`] is released or dropped. New handles are only created
/// when no idle handle is available, and never more than
/// [`max_concurrency()`][Self::max_concurrency] handles are checked out at the same time.
/// Acquisition never waits: a saturated pool fails immediately with
/// [`Error::CapacityExceeded`].
///
/// The pool owns a [`ConfigSet`] that is applied to every handle before it is dispensed.
/// Changing the configs does not touch handles that are checked out; each handle is
/// reconfigured the next time it flows out.
///
/// # Blockade and drain
///
/// [`blockade()`][Self::blockade] makes every subsequent acquisition fail with
/// [`Error::Blockaded`] and causes released handles to be destroyed rather than recycled.
/// [`drain()`][Self::drain] blockades the pool, waits for every checked-out handle to come back,
/// destroys the idle handles and then runs a callback while no handle exists, before lifting
/// the blockade again.
///
/// # Lifetime
///
/// Dropping the pool blockades it and closes all idle handles. Handles still checked out are
/// closed when they are released.
///
/// # Example
///
/// ```
/// use handle_pool::{BoxError, Handle, HandlePool, Priority};
///
/// #[derive(Default)]
/// struct Connection {
///     statements: Vec<String>,
/// }
///
/// impl Handle for Connection {
///     fn open(&mut self) -> Result<(), BoxError> {
///         Ok(())
///     }
///
///     fn close(&mut self) {}
/// }
///
/// let pool = HandlePool::new("main.db", || Ok(Connection::default()));
/// pool.set_config(
///     "busy_timeout",
///     |connection: &mut Connection| -> Result<(), BoxError> {
///         connection.statements.push("PRAGMA busy_timeout=5000".to_string());
///         Ok(())
///     },
///     Priority::DEFAULT,
/// );
///
/// let connection = pool.flow_out().unwrap();
/// assert_eq!(connection.statements, ["PRAGMA busy_timeout=5000"]);
/// assert_eq!(pool.alive_handle_count(), 1);
///
/// drop(connection);
/// assert_eq!(pool.alive_handle_count(), 0);
/// assert_eq!(pool.idle_handle_count(), 1);
/// ```
pub struct HandlePool<H>
where
    H: Handle,
{
    inner: Arc<PoolInner<H>>,
}

impl<H> HandlePool<H>
where
    H: Handle,
{
    /// Creates a pool with default settings.
    ///
    /// `path` identifies the family of resources the pool manages. It is only used to identify
    /// the pool in errors and logs. `factory` is called whenever the pool needs a new handle.
    ///
    /// Use [`HandlePool::builder()`] for custom configuration.
    #[must_use]
    pub fn new<F>(path: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<H, BoxError> + Send + Sync + 'static,
    {
        Self::builder(path, factory).build()
    }

    /// Creates a builder for configuring the pool.
    #[must_use]
    pub fn builder<F>(path: impl Into<String>, factory: F) -> HandlePoolBuilder<H>
    where
        F: Fn() -> std::result::Result<H, BoxError> + Send + Sync + 'static,
    {
        HandlePoolBuilder::new(path.into(), Box::new(factory))
    }

    /// Identity of the resource family this pool manages.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The maximum number of handles this pool allows to be checked out at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> NonZero<usize> {
        self.inner.max_concurrency
    }

    /// Checks out a handle.
    ///
    /// The most recently released idle handle is reused if there is one, otherwise a new
    /// handle is created. Before being returned, the handle is configured against the current
    /// config set if it is stale. If the configs change while they are being applied, the
    /// newer set is applied before the handle is returned. A change made after this returns
    /// only reaches the handle the next time it flows out.
    ///
    /// If the factory, [`Handle::open()`] or a config step panics, the pool gives back the
    /// concurrency slot and destroys any partially configured handle before the panic
    /// propagates.
    ///
    /// Failures are also recorded for the current thread, see
    /// [`last_error()`][crate::last_error].
    ///
    /// # Errors
    ///
    /// * [`Error::Blockaded`] if the pool is blockaded.
    /// * [`Error::CapacityExceeded`] if there is no idle handle and
    ///   [`max_concurrency()`][Self::max_concurrency] handles are already checked out.
    /// * [`Error::Creation`] if the factory or [`Handle::open()`] failed.
    /// * [`Error::Configuration`] if a config step failed. The handle has been destroyed.
    pub fn flow_out(&self) -> Result<RecyclableHandle<H>> {
        self.inner.flow_out().inspect_err(|error| {
            FLOW_OUT_FAILURES.with(|event| event.observe_once());
            warn!(
                path = %self.inner.path,
                kind = %error.kind(),
                error = %error,
                "failed to flow out handle"
            );
            error_sink::report(error);
        })
    }

    /// Destroys every idle handle. Checked-out handles are not affected.
    ///
    /// Returns the number of handles destroyed.
    pub fn purge(&self) -> usize {
        self.inner.purge()
    }

    /// The number of handles currently checked out.
    #[must_use]
    pub fn alive_handle_count(&self) -> usize {
        self.inner.alive_handle_count()
    }

    /// The number of idle handles waiting to be reused.
    #[must_use]
    pub fn idle_handle_count(&self) -> usize {
        let _memory = self.inner.memory.read();
        self.inner.frees.lock().len()
    }

    /// The number of live handles, checked out or idle.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.inner.memory.read().handles.len()
    }

    /// Stops the pool from dispensing handles until [`unblockade()`][Self::unblockade] is
    /// called.
    ///
    /// Handles released while the pool is blockaded are destroyed instead of recycled.
    pub fn blockade(&self) {
        self.inner.blockade();
    }

    /// Whether the pool is currently blockaded.
    #[must_use]
    pub fn is_blockaded(&self) -> bool {
        self.inner.is_blockaded()
    }

    /// Lifts the blockade, allowing handles to be dispensed again.
    pub fn unblockade(&self) {
        self.inner.unblockade();
    }

    /// Runs `on_drained` at a point where the pool has no handles at all.
    ///
    /// The pool is blockaded, then this blocks the calling thread until every checked-out handle
    /// has been released, destroys all idle handles and calls `on_drained`. The blockade is
    /// lifted before returning, also if `on_drained` panics.
    ///
    /// There is no timeout. If a [`RecyclableHandle`] is never released, this never returns.
    ///
    /// At most one drain or blockade/unblockade pair may be in progress per pool at a time.
    pub fn drain<R>(&self, on_drained: impl FnOnce() -> R) -> R {
        self.inner.blockade();

        let inner = &self.inner;
        let _unblockade = scopeguard::guard((), |()| inner.unblockade());

        debug!(path = %self.inner.path, "draining");

        DRAIN_WAIT_TIME_MS
            .with(|event| event.observe_duration_millis(|| self.inner.wait_until_drained()));
        self.inner.purge();

        debug!(path = %self.inner.path, "drained");

        on_drained()
    }

    /// Replaces the whole config set.
    ///
    /// The version of the pool's config set always moves forward, even if `configs` has a
    /// lower version than the set it replaces.
    pub fn set_configs(&self, mut configs: ConfigSet<H>) {
        let mut memory = self.inner.memory.write();

        let version = memory
            .configs
            .version()
            .max(configs.version())
            .checked_add(1)
            .expect("config version overflow - more than u64::MAX config mutations is not supported");
        configs.advance_version_to(version);

        memory.configs = Arc::new(configs);
        debug!(path = %self.inner.path, version, "replaced configs");
    }

    /// Adds the config step `name`, replacing any existing step with the same name.
    pub fn set_config(&self, name: impl Into<String>, config: impl Config<H>, priority: Priority) {
        let mut memory = self.inner.memory.write();

        let configs = Arc::make_mut(&mut memory.configs);
        configs.set(name, config, priority);

        debug!(path = %self.inner.path, version = configs.version(), "set config");
    }

    /// Removes the config step `name`. Returns whether there was such a step.
    pub fn remove_config(&self, name: &str) -> bool {
        let mut memory = self.inner.memory.write();

        let removed = Arc::make_mut(&mut memory.configs).remove(name);
        if removed {
            debug!(
                path = %self.inner.path,
                name,
                version = memory.configs.version(),
                "removed config"
            );
        }

        removed
    }

    /// The current version of the pool's config set.
    #[must_use]
    pub fn config_version(&self) -> u64 {
        self.inner.memory.read().configs.version()
    }
}

impl<H> fmt::Debug for HandlePool<H>
where
    H: Handle,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("inner", &self.inner)
            .finish()
    }
}

impl<H> Drop for HandlePool<H>
where
    H: Handle,
{
    fn drop(&mut self) {
        self.inner.blockade();
        self.inner.purge();
    }
}

/// Builder for configuring a [`HandlePool`].
pub struct HandlePoolBuilder<H>
where
    H: Handle,
{
    path: String,
    factory: Box<HandleFactory<H>>,
    max_concurrency: Option<NonZero<usize>>,
    configs: ConfigSet<H>,
}

impl<H> HandlePoolBuilder<H>
where
    H: Handle,
{
    fn new(path: String, factory: Box<HandleFactory<H>>) -> Self {
        Self {
            path,
            factory,
            max_concurrency: None,
            configs: ConfigSet::new(),
        }
    }

    /// Sets the maximum number of handles that may be checked out at the same time.
    ///
    /// Default is [`max_concurrency()`][crate::max_concurrency].
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: NonZero<usize>) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Sets the config set the pool starts with.
    ///
    /// Default is an empty set.
    #[must_use]
    pub fn configs(mut self, configs: ConfigSet<H>) -> Self {
        self.configs = configs;
        self
    }

    /// Builds the pool with the configured settings.
    #[must_use]
    pub fn build(self) -> HandlePool<H> {
        let inner = Arc::new(PoolInner {
            path: self.path,
            factory: self.factory,
            max_concurrency: self.max_concurrency.unwrap_or_else(max_concurrency),
            concurrency: RwLock::new(()),
            blockaded: AtomicBool::new(false),
            memory: RwLock::new(MemoryState {
                configs: Arc::new(self.configs),
                handles: HashSet::new(),
            }),
            frees: Mutex::new(Vec::new()),
            drained: Event::new(),
            next_handle_id: AtomicU64::new(0),
        });

        HandlePool { inner }
    }
}

impl<H> fmt::Debug for HandlePoolBuilder<H>
where
    H: Handle,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("path", &self.path)
            .field("max_concurrency", &self.max_concurrency)
            .field("configs", &self.configs)
            .finish_non_exhaustive()
    }
}
