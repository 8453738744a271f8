use crate::sample::Sample;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of samples retained per host.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Bounded FIFO of one host's samples, oldest first.
///
/// Arrival order is authoritative: samples are never reordered by
/// `captured_at`, even when an agent clock goes backwards.
#[derive(Debug, Clone)]
pub struct HostSeries {
    samples: VecDeque<Arc<Sample>>,
    capacity: usize,
}

impl HostSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample, returning the evicted oldest one when at capacity.
    pub fn push(&mut self, sample: Arc<Sample>) -> Option<Arc<Sample>> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Arc<Sample>> {
        self.samples.back()
    }

    /// Owned copy of the buffer, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().map(|s| Sample::clone(s)).collect()
    }
}
