use std::any::type_name;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Weak;

use tracing::trace;

use crate::pool::PoolInner;
use crate::{ConfiguredHandle, Handle, HandleId};

const ERR_CONSUMED: &str = "RecyclableHandle was already given back to the pool";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Disposition {
    Recycle,
    Discard,
}

/// A handle checked out from a [`HandlePool`][crate::HandlePool].
///
/// Dereferences to the underlying handle. The handle goes back to the pool exactly once: when
/// [`release()`][Self::release] or [`discard()`][Self::discard] is called, or when this value
/// is dropped. While it is checked out, no other `RecyclableHandle` refers to the same handle.
///
/// Only a weak reference to the pool is kept. If the pool has been dropped by the time the
/// handle is released, the handle is closed instead.
///
/// # Example
///
/// ```
/// use handle_pool::{BoxError, Handle, HandlePool};
///
/// struct Connection {
///     queries: u32,
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
/// let pool = HandlePool::new("main.db", || Ok(Connection { queries: 0 }));
///
/// let mut connection = pool.flow_out().unwrap();
/// connection.queries += 1;
/// let id = connection.id();
/// connection.release();
///
/// // The same handle is reused, with its state intact.
/// let connection = pool.flow_out().unwrap();
/// assert_eq!(connection.id(), id);
/// assert_eq!(connection.queries, 1);
/// ```
pub struct RecyclableHandle<H>
where
    H: Handle,
{
    // `None` once the handle has been given back to the pool.
    configured: Option<ConfiguredHandle<H>>,
    pool: Weak<PoolInner<H>>,
}

impl<H> RecyclableHandle<H>
where
    H: Handle,
{
    pub(crate) fn new(configured: ConfiguredHandle<H>, pool: Weak<PoolInner<H>>) -> Self {
        Self {
            configured: Some(configured),
            pool,
        }
    }

    fn configured(&self) -> &ConfiguredHandle<H> {
        self.configured.as_ref().expect(ERR_CONSUMED)
    }

    /// Identity of the underlying handle within its pool.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.configured().id()
    }

    /// The config version the handle was configured against when it was dispensed.
    #[must_use]
    pub fn configured_version(&self) -> u64 {
        self.configured()
            .configured_version()
            .expect("a dispensed handle is always fully configured")
    }

    /// Returns the handle to the pool.
    ///
    /// Equivalent to dropping this value.
    pub fn release(mut self) {
        let configured = self.take_configured();
        self.finish(configured, Disposition::Recycle);
    }

    /// Closes the handle instead of returning it to the pool, e.g. because the caller found it
    /// to be broken. Its concurrency slot is freed.
    pub fn discard(mut self) {
        let configured = self.take_configured();
        self.finish(configured, Disposition::Discard);
    }

    fn take_configured(&mut self) -> ConfiguredHandle<H> {
        self.configured.take().expect(ERR_CONSUMED)
    }

    fn finish(&self, configured: ConfiguredHandle<H>, disposition: Disposition) {
        let Some(pool) = self.pool.upgrade() else {
            trace!(handle_id = %configured.id(), "pool is gone, closing released handle");
            configured.close();
            return;
        };

        match disposition {
            Disposition::Recycle => pool.flow_back(configured),
            Disposition::Discard => pool.destroy(configured),
        }
    }
}

impl<H> Deref for RecyclableHandle<H>
where
    H: Handle,
{
    type Target = H;

    fn deref(&self) -> &H {
        self.configured().handle()
    }
}

impl<H> DerefMut for RecyclableHandle<H>
where
    H: Handle,
{
    fn deref_mut(&mut self) -> &mut H {
        self.configured.as_mut().expect(ERR_CONSUMED).handle_mut()
    }
}

impl<H> Drop for RecyclableHandle<H>
where
    H: Handle,
{
    fn drop(&mut self) {
        // Already given back if release() or discard() consumed this value.
        if let Some(configured) = self.configured.take() {
            self.finish(configured, Disposition::Recycle);
        }
    }
}

impl<H> fmt::Debug for RecyclableHandle<H>
where
    H: Handle,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("id", &self.configured.as_ref().map(ConfiguredHandle::id))
            .field("pool_alive", &(self.pool.strong_count() > 0))
            .finish()
    }
}
