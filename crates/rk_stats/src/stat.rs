use core::time::Duration;
use std::time::Instant;

use rk_os::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use rk_ptr::{RefCount, RefCounted, impl_ref_counted, impl_upcast};

use crate::{Snapshot, StatsError};

// -----------------------------------------------------------------------------
// Stat

/// A named statistic that can be exported by a [`StatsRegistry`].
///
/// Stats are shared through `RefPtr<dyn Stat>`, so every implementor embeds
/// its own [`RefCount`].
///
/// [`StatsRegistry`]: crate::StatsRegistry
pub trait Stat: RefCounted + Send + Sync {
    /// The full name, e.g. `fuse.read_us`.
    fn name(&self) -> &str;

    /// Writes the current values into `out` under `{name}.{suffix}` keys.
    fn export(&self, out: &mut Snapshot);
}

fn export_key(out: &mut Snapshot, name: &str, suffix: &str, value: i64) {
    out.insert(format!("{name}.{suffix}"), value);
}

fn average(sum: i64, count: u64) -> i64 {
    match i64::try_from(count) {
        Ok(0) | Err(_) => 0,
        Ok(count) => sum / count,
    }
}

// -----------------------------------------------------------------------------
// Counter

/// A stat that sums the values added to it.
///
/// Usually `1` is added per event, through [`increment`](Self::increment).
/// Exports `sum`, `count` and `avg`.
#[derive(Debug)]
pub struct Counter {
    rc: RefCount,
    name: String,
    sum: AtomicI64,
    count: AtomicU64,
}

impl_ref_counted!(Counter, rc);
impl_upcast!(Counter => dyn Stat);

impl Counter {
    /// Creates a counter, the name must not be empty.
    pub fn new(name: impl Into<String>) -> Result<Self, StatsError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StatsError::EmptyName);
        }
        Ok(Self {
            rc: RefCount::new(),
            name,
            sum: AtomicI64::new(0),
            count: AtomicU64::new(0),
        })
    }

    /// Adds one.
    #[inline]
    pub fn increment(&self) {
        self.add_value(1);
    }

    #[inline]
    pub fn add_value(&self, value: i64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn sum(&self) -> i64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Number of values added so far.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Integer mean of the added values, zero when nothing was added.
    pub fn average(&self) -> i64 {
        average(self.sum(), self.count())
    }
}

impl Stat for Counter {
    fn name(&self) -> &str {
        &self.name
    }

    fn export(&self, out: &mut Snapshot) {
        let sum = self.sum();
        let count = self.count();
        export_key(out, &self.name, "sum", sum);
        export_key(out, &self.name, "count", saturate(count));
        export_key(out, &self.name, "avg", average(sum, count));
    }
}

// -----------------------------------------------------------------------------
// DurationStat

/// A stat that records durations in microseconds.
///
/// The name must be longer than three characters and end in `_us`, so the
/// unit is visible wherever the stat is exported. Exports `sum`, `count`,
/// `avg`, `min` and `max`.
///
/// # Examples
///
/// ```
/// use core::time::Duration;
/// use rk_stats::DurationStat;
///
/// let stat = DurationStat::new("fuse.read_us").unwrap();
/// stat.add_duration(Duration::from_millis(2));
/// assert_eq!(stat.sum_us(), 2000);
///
/// assert!(DurationStat::new("fuse.read").is_err());
/// ```
#[derive(Debug)]
pub struct DurationStat {
    rc: RefCount,
    name: String,
    sum_us: AtomicU64,
    count: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl_ref_counted!(DurationStat, rc);
impl_upcast!(DurationStat => dyn Stat);

impl DurationStat {
    pub fn new(name: impl Into<String>) -> Result<Self, StatsError> {
        let name = name.into();
        if name.len() <= 3 || !name.ends_with("_us") {
            log::warn!("rejected duration stat name `{name}`");
            return Err(StatsError::InvalidDurationName(name));
        }
        Ok(Self {
            rc: RefCount::new(),
            name,
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        })
    }

    /// Records `duration`, truncated to whole microseconds.
    pub fn add_duration(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.sum_us.fetch_add(us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Starts timing, the elapsed time is recorded when the scope is dropped.
    #[inline]
    pub fn scope(&self) -> DurationScope<'_> {
        DurationScope {
            stat: self,
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn sum_us(&self) -> u64 {
        self.sum_us.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Shortest recorded duration, [`None`] before the first one.
    pub fn min_us(&self) -> Option<u64> {
        (self.count() != 0).then(|| self.min_us.load(Ordering::Relaxed))
    }

    /// Longest recorded duration, [`None`] before the first one.
    pub fn max_us(&self) -> Option<u64> {
        (self.count() != 0).then(|| self.max_us.load(Ordering::Relaxed))
    }

    pub fn average_us(&self) -> u64 {
        match self.count() {
            0 => 0,
            count => self.sum_us() / count,
        }
    }
}

impl Stat for DurationStat {
    fn name(&self) -> &str {
        &self.name
    }

    fn export(&self, out: &mut Snapshot) {
        let name = &self.name;
        export_key(out, name, "sum", saturate(self.sum_us()));
        export_key(out, name, "count", saturate(self.count()));
        export_key(out, name, "avg", saturate(self.average_us()));
        export_key(out, name, "min", saturate(self.min_us().unwrap_or(0)));
        export_key(out, name, "max", saturate(self.max_us().unwrap_or(0)));
    }
}

#[inline]
fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// -----------------------------------------------------------------------------
// DurationScope

/// Records the time since its creation into a [`DurationStat`] on drop.
#[must_use = "the duration is recorded when the scope is dropped"]
#[derive(Debug)]
pub struct DurationScope<'a> {
    stat: &'a DurationStat,
    start: Instant,
}

impl Drop for DurationScope<'_> {
    fn drop(&mut self) {
        self.stat.add_duration(self.start.elapsed());
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Counter, DurationStat, Stat};
    use crate::{Snapshot, StatsError};
    use core::time::Duration;
    use rk_ptr::RefCounted;

    #[test]
    fn counter_accumulates() {
        let counter = Counter::new("requests").unwrap();
        counter.increment();
        counter.increment();
        counter.add_value(4);

        assert_eq!(counter.sum(), 6);
        assert_eq!(counter.count(), 3);
        assert_eq!(counter.average(), 2);
        assert_eq!(counter.ref_count().count(), 0);
    }

    #[test]
    fn counter_rejects_empty_name() {
        assert_eq!(Counter::new("").unwrap_err(), StatsError::EmptyName);
    }

    #[test]
    fn duration_names_end_in_us() {
        assert!(DurationStat::new("read_us").is_ok());
        assert!(DurationStat::new("a_us").is_ok());
        assert!(matches!(
            DurationStat::new("_us"),
            Err(StatsError::InvalidDurationName(_))
        ));
        assert!(matches!(
            DurationStat::new("read_ms"),
            Err(StatsError::InvalidDurationName(_))
        ));
    }

    #[test]
    fn duration_tracks_min_max() {
        let stat = DurationStat::new("fetch_us").unwrap();
        assert_eq!(stat.min_us(), None);
        assert_eq!(stat.max_us(), None);
        assert_eq!(stat.average_us(), 0);

        stat.add_duration(Duration::from_micros(30));
        stat.add_duration(Duration::from_micros(10));
        stat.add_duration(Duration::from_nanos(20_999));

        assert_eq!(stat.count(), 3);
        assert_eq!(stat.sum_us(), 60);
        assert_eq!(stat.min_us(), Some(10));
        assert_eq!(stat.max_us(), Some(30));
        assert_eq!(stat.average_us(), 20);
    }

    #[test]
    fn scope_records_on_drop() {
        let stat = DurationStat::new("scope_us").unwrap();
        {
            let _scope = stat.scope();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(stat.count(), 1);
        assert!(stat.sum_us() >= 1000);
    }

    #[test]
    fn export_keys() {
        let stat = DurationStat::new("io_us").unwrap();
        stat.add_duration(Duration::from_micros(5));

        let mut out = Snapshot::default();
        stat.export(&mut out);
        assert_eq!(out.len(), 5);
        assert_eq!(out["io_us.sum"], 5);
        assert_eq!(out["io_us.min"], 5);

        let counter = Counter::new("hits").unwrap();
        let mut out = Snapshot::default();
        counter.export(&mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out["hits.count"], 0);
        assert_eq!(out["hits.avg"], 0);
    }
}
