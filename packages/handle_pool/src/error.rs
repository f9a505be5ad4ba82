use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Error type produced by the collaborators of a pool: the handle factory, [`Handle::open()`]
/// and [`Config::apply()`].
///
/// [`Handle::open()`]: crate::Handle::open
/// [`Config::apply()`]: crate::Config::apply
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur when acquiring a handle from a [`HandlePool`][crate::HandlePool].
///
/// Every variant identifies the pool by its path. None of them leave the pool in a
/// corrupted state; the caller decides whether to retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The handle factory or [`Handle::open()`][crate::Handle::open] failed.
    ///
    /// No handle was produced and no concurrency slot remains consumed.
    #[error("failed to create a handle for '{path}'")]
    Creation {
        /// Identity of the pool that failed to create a handle.
        path: String,

        /// The error reported by the factory or by the handle itself.
        #[source]
        source: BoxError,
    },

    /// A config step failed while (re)configuring a handle that was about to be dispensed.
    ///
    /// The handle has been closed and discarded, it is not returned to the idle list.
    #[error("config '{config}' failed to apply to a handle for '{path}'")]
    Configuration {
        /// Identity of the pool that dispensed the handle.
        path: String,

        /// Name of the config step that failed.
        config: String,

        /// The error reported by the config step.
        #[source]
        source: BoxError,
    },

    /// There is no idle handle and the pool already has its maximum number of handles
    /// checked out.
    #[error("all {max_concurrency} handles for '{path}' are in use")]
    CapacityExceeded {
        /// Identity of the saturated pool.
        path: String,

        /// The concurrency limit of the pool.
        max_concurrency: usize,
    },

    /// The pool is blockaded and refuses new acquisitions until it is unblockaded.
    #[error("handle pool for '{path}' is blockaded")]
    Blockaded {
        /// Identity of the blockaded pool.
        path: String,
    },
}

impl Error {
    /// The category of the error, for matching without taking ownership.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Creation { .. } => ErrorKind::Creation,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::Blockaded { .. } => ErrorKind::Blockaded,
        }
    }

    /// Identity of the pool that reported the error.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Creation { path, .. }
            | Self::Configuration { path, .. }
            | Self::CapacityExceeded { path, .. }
            | Self::Blockaded { path } => path,
        }
    }
}

/// The category of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::Creation`].
    Creation,

    /// See [`Error::Configuration`].
    Configuration,

    /// See [`Error::CapacityExceeded`].
    CapacityExceeded,

    /// See [`Error::Blockaded`].
    Blockaded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Creation => "creation failure",
            Self::Configuration => "configuration failure",
            Self::CapacityExceeded => "capacity exceeded",
            Self::Blockaded => "blockaded",
        };

        f.write_str(name)
    }
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
