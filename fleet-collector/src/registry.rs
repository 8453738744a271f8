/**
 * HOST REGISTRY - In-memory time-series store keyed by host identity
 *
 * ROLE: owns one bounded `HostSeries` per reporting host plus the
 * wall-clock time of its last successful ingest (`last_seen`).
 *
 * LOCKING:
 * - the host map is behind a `RwLock`, held only to look up, insert or
 *   remove an entry handle;
 * - every entry has its own `Mutex`, so a busy host never stalls ingestion
 *   of the others;
 * - eviction takes the map write lock then the entry lock, and flags the
 *   entry as retired before removing it. A writer that wins the entry lock
 *   on a retired entry goes back to the map and starts a fresh series.
 *
 * The registry is purely in-memory and is rebuilt from zero on restart.
 */

use crate::sample::Sample;
use crate::series::HostSeries;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

#[derive(Debug)]
struct HostEntry {
    series: HostSeries,
    last_seen: OffsetDateTime,
    retired: bool,
}

type EntryHandle = Arc<Mutex<HostEntry>>;

/// Outcome of one eviction pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<String>,
    pub remaining: usize,
}

#[derive(Debug)]
pub struct Registry {
    hosts: RwLock<HashMap<String, EntryHandle>>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked hosts.
    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    fn entry(&self, host_id: &str) -> Option<EntryHandle> {
        self.hosts.read().get(host_id).cloned()
    }

    fn handles(&self) -> Vec<(String, EntryHandle)> {
        self.hosts
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Appends `sample` to its host's series and refreshes `last_seen` in a
    /// single step: concurrent readers observe both updates or neither.
    ///
    /// `on_append` runs while the host's entry is still locked, so anything it
    /// emits follows the per-host arrival order. It must not call back into
    /// the registry.
    pub fn record<F>(&self, sample: Arc<Sample>, now: OffsetDateTime, on_append: F)
    where
        F: FnOnce(&Arc<Sample>),
    {
        loop {
            if let Some(entry) = self.entry(&sample.host_id) {
                let mut guard = entry.lock();
                if guard.retired {
                    continue;
                }
                guard.series.push(Arc::clone(&sample));
                guard.last_seen = now;
                on_append(&sample);
                return;
            }

            let mut hosts = self.hosts.write();
            if hosts.contains_key(&sample.host_id) {
                continue;
            }
            let mut series = HostSeries::with_capacity(self.capacity);
            series.push(Arc::clone(&sample));
            let entry = Arc::new(Mutex::new(HostEntry {
                series,
                last_seen: now,
                retired: false,
            }));
            let _guard = entry.lock();
            hosts.insert(sample.host_id.clone(), Arc::clone(&entry));
            drop(hosts);
            on_append(&sample);
            return;
        }
    }

    /// Appends a sample stamped with the current wall-clock time.
    pub fn append(&self, sample: Sample) {
        self.record(Arc::new(sample), OffsetDateTime::now_utc(), |_| {});
    }

    /// Refreshes `last_seen` of a tracked host. Unknown hosts are left
    /// untracked: presence requires at least one sample.
    pub fn touch(&self, host_id: &str, now: OffsetDateTime) {
        if let Some(entry) = self.entry(host_id) {
            let mut guard = entry.lock();
            if !guard.retired {
                guard.last_seen = now;
            }
        }
    }

    /// Point-in-time copy of a host's series, oldest first.
    pub fn history(&self, host_id: &str) -> Option<Vec<Sample>> {
        let entry = self.entry(host_id)?;
        let guard = entry.lock();
        if guard.retired {
            return None;
        }
        Some(guard.series.snapshot())
    }

    /// Copy of every host's series.
    pub fn histories(&self) -> HashMap<String, Vec<Sample>> {
        self.handles()
            .into_iter()
            .filter_map(|(id, entry)| {
                let guard = entry.lock();
                if guard.retired {
                    None
                } else {
                    Some((id, guard.series.snapshot()))
                }
            })
            .collect()
    }

    /// Hosts whose last ingest is at most `soft_threshold` old.
    pub fn active_hosts(&self, now: OffsetDateTime, soft_threshold: Duration) -> BTreeSet<String> {
        self.handles()
            .into_iter()
            .filter(|(_, entry)| {
                let guard = entry.lock();
                !guard.retired && now - guard.last_seen <= soft_threshold
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// `last_seen` of every tracked host.
    pub fn last_seen(&self) -> HashMap<String, OffsetDateTime> {
        self.handles()
            .into_iter()
            .filter_map(|(id, entry)| {
                let guard = entry.lock();
                if guard.retired {
                    None
                } else {
                    Some((id, guard.last_seen))
                }
            })
            .collect()
    }

    /// Drops a host and its history. Returns false if it was not tracked.
    pub fn evict(&self, host_id: &str) -> bool {
        let mut hosts = self.hosts.write();
        match hosts.remove(host_id) {
            Some(entry) => {
                entry.lock().retired = true;
                true
            }
            None => false,
        }
    }

    /// Evicts every host silent for longer than `hard_threshold`.
    ///
    /// Candidates are collected without the write lock; each one is then
    /// re-checked and removed under its own short write-lock section, so
    /// ingestion for other hosts keeps going during a sweep.
    pub fn sweep(&self, now: OffsetDateTime, hard_threshold: Duration) -> SweepReport {
        let candidates: Vec<String> = self
            .handles()
            .into_iter()
            .filter(|(_, entry)| now - entry.lock().last_seen > hard_threshold)
            .map(|(id, _)| id)
            .collect();

        let mut evicted = Vec::with_capacity(candidates.len());
        for host_id in candidates {
            let mut hosts = self.hosts.write();
            let Some(entry) = hosts.get(&host_id).cloned() else {
                continue;
            };
            let mut guard = entry.lock();
            // the host may have reported since the candidate scan
            if now - guard.last_seen <= hard_threshold {
                continue;
            }
            guard.retired = true;
            drop(guard);
            hosts.remove(&host_id);
            evicted.push(host_id);
        }

        SweepReport {
            evicted,
            remaining: self.len(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(crate::series::DEFAULT_HISTORY_CAPACITY)
    }
}
