use std::fmt;

use crate::{BoxError, ConfigSet, Handle};

/// Stable identity of a handle within its pool.
///
/// Two [`RecyclableHandle`][crate::RecyclableHandle]s with equal IDs wrapped the same
/// underlying handle, at different times.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle plus the config version it was last fully configured against.
#[derive(Debug)]
pub(crate) struct ConfiguredHandle<H> {
    id: HandleId,
    handle: H,

    // `None` until every step of some config set has been applied successfully.
    configured_version: Option<u64>,
}

impl<H> ConfiguredHandle<H>
where
    H: Handle,
{
    pub(crate) fn new(id: HandleId, handle: H) -> Self {
        Self {
            id,
            handle,
            configured_version: None,
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn configured_version(&self) -> Option<u64> {
        self.configured_version
    }

    pub(crate) fn is_stale(&self, configs: &ConfigSet<H>) -> bool {
        self.configured_version != Some(configs.version())
    }

    /// Applies all of `configs` to the handle.
    ///
    /// The handle is only marked as configured once every step has succeeded. After a failure
    /// it is left unconfigured and must be discarded by the caller.
    pub(crate) fn configure(&mut self, configs: &ConfigSet<H>) -> Result<(), (String, BoxError)> {
        self.configured_version = None;

        configs
            .apply_all(&mut self.handle)
            .map_err(|(name, error)| (name.to_string(), error))?;

        self.configured_version = Some(configs.version());
        Ok(())
    }

    pub(crate) fn handle(&self) -> &H {
        &self.handle
    }

    pub(crate) fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Closes the underlying handle, consuming the wrapper.
    pub(crate) fn close(mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Priority;

    #[derive(Default)]
    struct Probe {
        applied: u32,
    }

    impl Handle for Probe {
        fn open(&mut self) -> Result<(), BoxError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn count(probe: &mut Probe) -> Result<(), BoxError> {
        probe.applied += 1;
        Ok(())
    }

    fn refuse(_: &mut Probe) -> Result<(), BoxError> {
        Err("refused".into())
    }

    #[test]
    fn new_handle_is_stale_even_for_empty_set() {
        let configured = ConfiguredHandle::new(HandleId::new(1), Probe::default());

        assert!(configured.is_stale(&ConfigSet::new()));
        assert_eq!(configured.configured_version(), None);
    }

    #[test]
    fn configure_records_version() {
        let mut configs = ConfigSet::new();
        configs.set("count", count, Priority::DEFAULT);

        let mut configured = ConfiguredHandle::new(HandleId::new(1), Probe::default());
        configured.configure(&configs).unwrap();

        assert!(!configured.is_stale(&configs));
        assert_eq!(configured.configured_version(), Some(1));
        assert_eq!(configured.handle().applied, 1);

        configs.set("again", count, Priority::LOW);
        assert!(configured.is_stale(&configs));
    }

    #[test]
    fn failed_configure_leaves_handle_unconfigured() {
        let mut configs = ConfigSet::new();
        configs.set("count", count, Priority::DEFAULT);

        let mut configured = ConfiguredHandle::new(HandleId::new(1), Probe::default());
        configured.configure(&configs).unwrap();

        configs.set("refuse", refuse, Priority::LOW);
        let (name, _) = configured.configure(&configs).unwrap_err();

        assert_eq!(name, "refuse");
        assert_eq!(configured.configured_version(), None);
        assert!(configured.is_stale(&configs));
    }

    #[test]
    fn handle_id_displays_as_number() {
        assert_eq!(HandleId::new(42).to_string(), "42");
    }
}
