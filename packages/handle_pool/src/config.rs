use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::BoxError;

/// A named configuration step that a [`HandlePool`][crate::HandlePool] applies to each of
/// its handles before dispensing them.
///
/// Closures of the form `Fn(&mut H) -> Result<(), BoxError>` implement this trait.
///
/// # Example
///
/// ```
/// use handle_pool::{BoxError, Config, ConfigSet, Priority};
///
/// struct Connection {
///     pragmas: Vec<String>,
/// }
///
/// struct JournalMode(&'static str);
///
/// impl Config<Connection> for JournalMode {
///     fn apply(&self, connection: &mut Connection) -> Result<(), BoxError> {
///         connection.pragmas.push(format!("journal_mode={}", self.0));
///         Ok(())
///     }
/// }
///
/// let mut configs = ConfigSet::new();
/// configs.set("journal_mode", JournalMode("WAL"), Priority::DEFAULT);
/// configs.set(
///     "foreign_keys",
///     |connection: &mut Connection| -> Result<(), BoxError> {
///         connection.pragmas.push("foreign_keys=ON".to_string());
///         Ok(())
///     },
///     Priority::HIGH,
/// );
///
/// let names: Vec<_> = configs.iter().map(|(name, _)| name).collect();
/// assert_eq!(names, ["foreign_keys", "journal_mode"]);
/// ```
pub trait Config<H>: Send + Sync + 'static {
    /// Applies this step to `handle`.
    ///
    /// # Errors
    ///
    /// Returns the reason the step could not be applied. The pool then discards the handle
    /// instead of dispensing a partially configured one.
    fn apply(&self, handle: &mut H) -> Result<(), BoxError>;
}

impl<H, F> Config<H> for F
where
    F: Fn(&mut H) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn apply(&self, handle: &mut H) -> Result<(), BoxError> {
        self(handle)
    }
}

/// Order in which a config step is applied. Steps with a lower value are applied first.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Priority(i32);

impl Priority {
    /// Applied before everything else.
    pub const HIGHEST: Self = Self(i32::MIN);

    /// Applied before default-priority steps.
    pub const HIGH: Self = Self(-100);

    /// The priority of ordinary steps.
    pub const DEFAULT: Self = Self(0);

    /// Applied after default-priority steps.
    pub const LOW: Self = Self(100);

    /// Applied after everything else.
    pub const LOWEST: Self = Self(i32::MAX);

    /// Creates a priority with an explicit value.
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// The numeric value of the priority.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

struct Entry<H> {
    name: String,
    priority: Priority,
    // Position among entries of equal priority.
    sequence: u64,
    config: Arc<dyn Config<H>>,
}

impl<H> Entry<H> {
    fn sort_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl<H> Clone for Entry<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            priority: self.priority,
            sequence: self.sequence,
            config: Arc::clone(&self.config),
        }
    }
}

/// An ordered set of named config steps with a version counter.
///
/// Iteration always follows [`Priority`] order, with ties broken by insertion order. Setting
/// a name that is already present replaces the step and moves it to the end of its priority
/// band. Every mutation increments [`version()`][Self::version], which is how a pool detects
/// handles configured against an older set.
pub struct ConfigSet<H> {
    // Sorted by `Entry::sort_key`.
    entries: Vec<Entry<H>>,
    next_sequence: u64,
    version: u64,
}

impl<H> ConfigSet<H>
where
    H: 'static,
{
    /// Creates an empty set with version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
            version: 0,
        }
    }

    /// Adds the step `name`, replacing any existing step with the same name.
    pub fn set(&mut self, name: impl Into<String>, config: impl Config<H>, priority: Priority) {
        let name = name.into();
        self.entries.retain(|entry| entry.name != name);

        let entry = Entry {
            name,
            priority,
            sequence: self.next_sequence,
            config: Arc::new(config),
        };
        self.next_sequence = self
            .next_sequence
            .checked_add(1)
            .expect("config sequence overflow - more than u64::MAX config mutations is not supported");

        let key = entry.sort_key();
        let index = self
            .entries
            .partition_point(|existing| existing.sort_key() < key);
        self.entries.insert(index, entry);

        self.bump_version();
    }

    /// Removes the step `name`. Returns `false` and leaves the version unchanged if there
    /// was no such step.
    pub fn remove(&mut self, name: &str) -> bool {
        let len_before = self.entries.len();
        self.entries.retain(|entry| entry.name != name);

        if self.entries.len() == len_before {
            return false;
        }

        self.bump_version();
        true
    }

    /// The priority of the step `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Priority> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.priority)
    }

    /// Whether a step named `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of steps in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The version counter, incremented by every mutation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Names and priorities of the steps, in the order they are applied.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Priority)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.priority))
    }

    /// Moves the version forward to `version`. Versions never go backwards.
    pub(crate) fn advance_version_to(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    /// Applies every step to `handle` in order, stopping at the first failure.
    ///
    /// On failure, returns the name of the failing step and its error.
    pub(crate) fn apply_all(&self, handle: &mut H) -> Result<(), (&str, BoxError)> {
        for entry in &self.entries {
            entry
                .config
                .apply(handle)
                .map_err(|error| (entry.name.as_str(), error))?;
        }

        Ok(())
    }

    fn bump_version(&mut self) {
        self.version = self
            .version
            .checked_add(1)
            .expect("config version overflow - more than u64::MAX config mutations is not supported");
    }
}

impl<H> Default for ConfigSet<H>
where
    H: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// Implemented manually to avoid requiring `H: Clone`. Steps are shared, not duplicated.
impl<H> Clone for ConfigSet<H> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            next_sequence: self.next_sequence,
            version: self.version,
        }
    }
}

impl<H> fmt::Debug for ConfigSet<H>
where
    H: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("version", &self.version)
            .field("entries", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}
