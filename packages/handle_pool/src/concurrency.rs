//! Admission limits shared by all pools in the process.

use std::num::NonZero;
use std::sync::OnceLock;

use many_cpus::HardwareInfo;
use new_zealand::nz;

/// How many handles a pool may have checked out per processor by default.
///
/// Handles spend much of their checked-out time blocked on I/O, so allowing a few per processor
/// absorbs bursts without letting the handle count grow without bound.
const HANDLES_PER_PROCESSOR: NonZero<usize> = nz!(4_usize);

static HARDWARE_CONCURRENCY: OnceLock<NonZero<usize>> = OnceLock::new();

/// The number of processors on the host.
///
/// The value is determined once per process and does not change afterwards.
///
/// # Example
///
/// ```
/// let processors = handle_pool::hardware_concurrency();
/// assert!(processors.get() >= 1);
/// ```
#[must_use]
pub fn hardware_concurrency() -> NonZero<usize> {
    *HARDWARE_CONCURRENCY
        .get_or_init(|| NonZero::new(HardwareInfo::max_processor_count()).unwrap_or(nz!(1)))
}

/// The default cap on simultaneously checked-out handles of a pool.
///
/// Pools created with [`HandlePoolBuilder::max_concurrency()`][1] use their own cap instead.
///
/// [1]: crate::HandlePoolBuilder::max_concurrency
#[must_use]
pub fn max_concurrency() -> NonZero<usize> {
    hardware_concurrency().saturating_mul(HANDLES_PER_PROCESSOR)
}
