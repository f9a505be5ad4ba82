#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A bounded pool of expensive, stateful resource handles such as database connections.
//!
//! Handles are created lazily by a factory, reused across threads, reconfigured in place when
//! the pool's configuration changes and torn down without racing the threads that use them.
//!
//! # Quick start
//!
//! ```rust
//! use handle_pool::{BoxError, Handle, HandlePool};
//! use new_zealand::nz;
//!
//! struct Connection;
//!
//! impl Handle for Connection {
//!     fn open(&mut self) -> Result<(), BoxError> {
//!         Ok(())
//!     }
//!
//!     fn close(&mut self) {}
//! }
//!
//! let pool = HandlePool::builder("main.db", || Ok(Connection))
//!     .max_concurrency(nz!(2))
//!     .build();
//!
//! let first = pool.flow_out().unwrap();
//! let second = pool.flow_out().unwrap();
//!
//! // The pool does not queue callers, a saturated pool fails immediately.
//! assert!(pool.flow_out().is_err());
//!
//! drop(first);
//! let third = pool.flow_out().unwrap();
//! # drop((second, third));
//! ```
//!
//! # Key features
//!
//! - **Admission limit**: at most [`max_concurrency()`] handles are checked out at once,
//!   defaulting to a small multiple of [`hardware_concurrency()`]. There is no waiting queue.
//! - **Live configuration**: a [`ConfigSet`] of prioritized steps is applied to every handle.
//!   Changing it never touches handles in use; stale handles are reconfigured when they next
//!   flow out, and a handle that fails to reconfigure is destroyed, never recycled.
//! - **Blockade and drain**: [`HandlePool::drain()`] stops new acquisitions, waits for every
//!   handle to come back and runs a callback while no handle exists, e.g. to close or replace
//!   the underlying resource.
//!
//! # Errors
//!
//! Failures are returned as [`Error`] and also recorded for the calling thread, where they can
//! be inspected with [`last_error()`].
//!
//! # Observability
//!
//! The pool logs through `tracing` and records metrics through `nm` events whose names start
//! with `handle_pool_`.

mod concurrency;
mod config;
mod configured_handle;
mod error;
mod error_sink;
mod handle;
mod metrics;
mod pool;
mod recyclable_handle;

pub use concurrency::*;
pub use config::*;
pub(crate) use configured_handle::ConfiguredHandle;
pub use configured_handle::HandleId;
pub use error::{BoxError, Error, ErrorKind};
pub use error_sink::{ErrorReport, last_error, take_last_error};
pub use handle::Handle;
pub use pool::{HandlePool, HandlePoolBuilder};
pub use recyclable_handle::*;
