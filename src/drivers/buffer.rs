use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::drivers::ScopeError;
use crate::types::Sample;

/// Immutable copy of the rolling history, taken under the store lock.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelSnapshot {
    pub time: Vec<f64>,
    pub channels: Vec<Vec<f64>>, // channels x samples
}
impl ChannelSnapshot {
    pub fn len(&self) -> usize {
        self.time.len()
    }
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
    /// Newest time and the newest value of every channel.
    pub fn latest(&self) -> Option<(f64, Vec<f64>)> {
        let t = *self.time.last()?;
        let values = self
            .channels
            .iter()
            .filter_map(|c| c.last().copied())
            .collect();
        Some((t, values))
    }
    /// Span covered by the snapshot, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

/// Rolling history of N channels plus a shared time axis.
///
/// Every series, the time axis included, always has the same length.
#[derive(Debug)]
pub struct ChannelStore {
    time: VecDeque<f64>,
    channels: Vec<VecDeque<f64>>, // channel -> samples
    capacity: usize,
}
impl ChannelStore {
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            time: VecDeque::new(),
            channels: vec![VecDeque::new(); channel_count],
            capacity,
        }
    }
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn len(&self) -> usize {
        self.time.len()
    }
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
    pub fn append(&mut self, sample: &Sample) -> Result<(), ScopeError> {
        if sample.values.len() != self.channels.len() {
            return Err(ScopeError::ChannelMismatch {
                expected: self.channels.len(),
                actual: sample.values.len(),
            });
        }
        // Keep the time axis non-decreasing.
        let t = match self.time.back() {
            Some(&last) if sample.elapsed_secs < last => last,
            _ => sample.elapsed_secs,
        };
        self.time.push_back(t);
        for (series, &value) in self.channels.iter_mut().zip(&sample.values) {
            series.push_back(value);
        }
        self.evict_excess();
        Ok(())
    }
    /// Clears every series. Channel count and capacity are kept.
    pub fn reset(&mut self) {
        self.time.clear();
        for series in &mut self.channels {
            series.clear();
        }
    }
    /// Switches to a new channel count. History is discarded.
    pub fn resize(&mut self, channel_count: usize) {
        self.time.clear();
        self.channels = vec![VecDeque::new(); channel_count];
    }
    /// Applies a new bound; shrinking trims the oldest values right away.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_excess();
    }
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            time: self.time.iter().copied().collect(),
            channels: self
                .channels
                .iter()
                .map(|series| series.iter().copied().collect())
                .collect(),
        }
    }
    pub fn latest(&self) -> Option<Sample> {
        let t = *self.time.back()?;
        Some(Sample {
            elapsed_secs: t,
            values: self
                .channels
                .iter()
                .filter_map(|series| series.back().copied())
                .collect(),
        })
    }
    fn evict_excess(&mut self) {
        let excess = self.time.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        self.time.drain(..excess);
        for series in &mut self.channels {
            series.drain(..excess);
        }
    }
}

/// Store handle shared between the acquisition thread and consumers.
///
/// Every method takes the lock for the whole operation, so readers never see
/// series of unequal length.
#[derive(Clone, Debug)]
pub struct SharedStore {
    inner: Arc<Mutex<ChannelStore>>,
}
impl SharedStore {
    pub fn new(store: ChannelStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }
    /// Locks the store. A poisoned lock is recovered: the store is always left
    /// consistent between operations.
    pub fn lock(&self) -> MutexGuard<'_, ChannelStore> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    pub fn append(&self, sample: &Sample) -> Result<(), ScopeError> {
        self.lock().append(sample)
    }
    pub fn snapshot(&self) -> ChannelSnapshot {
        self.lock().snapshot()
    }
    pub fn latest(&self) -> Option<Sample> {
        self.lock().latest()
    }
    pub fn len(&self) -> usize {
        self.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
    pub fn channel_count(&self) -> usize {
        self.lock().channel_count()
    }
}
