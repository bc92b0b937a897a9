use rk_os::sync::{Mutex, MutexGuard, PoisonError};
use rk_ptr::{RefCount, RefPtr, impl_ref_counted};

use hashbrown::HashMap;

use crate::{Counter, DurationStat, FixedHashState, Stat, StatsError};

/// Exported values keyed by `{stat}.{suffix}`.
pub type Snapshot = HashMap<String, i64, FixedHashState>;

// -----------------------------------------------------------------------------
// StatsRegistry

/// The set of stats exported by a process.
///
/// Every stat is registered once under its full name. The registry keeps a
/// share of each stat alive until it is unregistered or the registry is
/// dropped.
///
/// The registry itself is usually shared as a `RefPtr<StatsRegistry>`, see
/// [`StatsGroup`].
pub struct StatsRegistry {
    rc: RefCount,
    stats: Mutex<HashMap<String, RefPtr<dyn Stat>, FixedHashState>>,
}

impl_ref_counted!(StatsRegistry, rc);

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            rc: RefCount::new(),
            stats: Mutex::new(HashMap::with_hasher(FixedHashState)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RefPtr<dyn Stat>, FixedHashState>> {
        // The map is never left half updated, so a poisoned lock is still usable.
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `stat` under its name.
    ///
    /// Fails if a stat with the same name already exists. An empty pointer
    /// is ignored.
    pub fn register(&self, stat: RefPtr<dyn Stat>) -> Result<(), StatsError> {
        let Some(name) = stat.as_deref().map(|s| String::from(s.name())) else {
            return Ok(());
        };

        let mut stats = self.lock();
        if stats.contains_key(name.as_str()) {
            log::warn!("stat `{name}` registered twice");
            return Err(StatsError::Duplicate(name));
        }
        stats.insert(name, stat);
        Ok(())
    }

    /// Returns a new share of the stat called `name`.
    pub fn get(&self, name: &str) -> Option<RefPtr<dyn Stat>> {
        self.lock().get(name).map(RefPtr::copy)
    }

    /// Removes the stat called `name`, returns `false` if it was unknown.
    pub fn unregister(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Collects the exported values of every registered stat.
    pub fn snapshot(&self) -> Snapshot {
        let mut out = Snapshot::default();
        for stat in self.lock().values() {
            stat.export(&mut out);
        }
        out
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// StatsGroup

/// Creates stats that share a name prefix and registers them.
///
/// # Examples
///
/// ```
/// use core::time::Duration;
/// use rk_ptr::RefPtr;
/// use rk_stats::{StatsGroup, StatsRegistry};
///
/// let registry = RefPtr::new(StatsRegistry::new());
/// let fuse = StatsGroup::new(&registry, "fuse.");
///
/// let reads = fuse.duration("fuse.read_us").unwrap();
/// reads.add_duration(Duration::from_micros(40));
///
/// let snapshot = registry.snapshot();
/// assert_eq!(snapshot["fuse.read_us.sum"], 40);
/// assert!(fuse.counter("other.count").is_err());
/// ```
#[derive(Debug)]
pub struct StatsGroup {
    prefix: String,
    registry: RefPtr<StatsRegistry>,
}

impl StatsGroup {
    /// Creates a group registering into `registry`.
    pub fn new(registry: &RefPtr<StatsRegistry>, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            registry: registry.copy(),
        }
    }

    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    pub fn registry(&self) -> &RefPtr<StatsRegistry> {
        &self.registry
    }

    fn check_name(&self, name: &str) -> Result<(), StatsError> {
        if name.starts_with(&self.prefix) {
            Ok(())
        } else {
            log::warn!("stat `{name}` is outside of group `{}`", self.prefix);
            Err(StatsError::OutsideGroup {
                name: String::from(name),
                prefix: self.prefix.clone(),
            })
        }
    }

    /// Creates and registers a [`Counter`].
    pub fn counter(&self, name: &str) -> Result<RefPtr<Counter>, StatsError> {
        self.check_name(name)?;
        let counter = RefPtr::new(Counter::new(name)?);
        self.registry.register(counter.copy().upcast())?;
        Ok(counter)
    }

    /// Creates and registers a [`DurationStat`].
    pub fn duration(&self, name: &str) -> Result<RefPtr<DurationStat>, StatsError> {
        self.check_name(name)?;
        let stat = RefPtr::new(DurationStat::new(name)?);
        self.registry.register(stat.copy().upcast())?;
        Ok(stat)
    }
}

// -----------------------------------------------------------------------------
// Tests
