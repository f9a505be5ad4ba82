use crate::BoxError;

/// A live resource instance managed by a [`HandlePool`][crate::HandlePool], such as a
/// database connection.
///
/// The pool calls [`open()`][Self::open] once, right after the handle factory produced the
/// handle and before any config step runs, and [`close()`][Self::close] once, when the handle
/// is destroyed. A handle is only ever used by one thread at a time, so it needs to be `Send`
/// but not `Sync`.
pub trait Handle: Send + 'static {
    /// Acquires the underlying resource.
    ///
    /// A failure here is reported to the caller of
    /// [`HandlePool::flow_out()`][crate::HandlePool::flow_out] as
    /// [`Error::Creation`][crate::Error::Creation].
    ///
    /// # Errors
    ///
    /// Returns the reason the resource could not be acquired.
    fn open(&mut self) -> Result<(), BoxError>;

    /// Releases the underlying resource.
    ///
    /// The pool never uses the handle again after calling this.
    fn close(&mut self);
}

/// Factory that the pool calls whenever it needs a new handle and none is idle.
///
/// The factory may be called concurrently from multiple threads and must not retain any
/// reference to the pool.
pub(crate) type HandleFactory<H> = dyn Fn() -> Result<H, BoxError> + Send + Sync;
