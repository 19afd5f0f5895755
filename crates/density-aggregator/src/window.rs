//! Bounded rolling window of sample totals

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// One windowed observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowEntry {
    pub received_at: DateTime<Utc>,
    pub total: u32,
}

/// Fixed-capacity window; pushing into a full window evicts the oldest entry
#[derive(Debug, Clone)]
pub struct SampleWindow {
    data: VecDeque<WindowEntry>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: WindowEntry) {
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(entry);
    }

    pub fn back(&self) -> Option<&WindowEntry> {
        self.data.back()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry> {
        self.data.iter()
    }

    /// Mean total over the window
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|e| e.total as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Mean and population standard deviation of all but the newest entry
    pub fn history_stats(&self) -> Option<(f64, f64)> {
        if self.data.len() < 2 {
            return None;
        }
        let history: Vec<f64> = self
            .data
            .iter()
            .take(self.data.len() - 1)
            .map(|e| e.total as f64)
            .collect();
        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let variance = history.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Some((mean, variance.sqrt()))
    }
}
