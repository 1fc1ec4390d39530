//! Batch accumulator
//!
//! Buffers readings until a size threshold is reached. `flush_if_full` is
//! the only operation that clears the buffer during normal running; taking
//! `&mut self` makes the check-and-clear indivisible.

use crate::models::{Batch, Reading};
use anyhow::{ensure, Result};

pub struct BatchAccumulator {
    buffer: Vec<Reading>,
    threshold: usize,
    appended_since_flush: u64,
    total_appended: u64,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Result<Self> {
        ensure!(threshold > 0, "batch threshold must be greater than zero");

        Ok(Self {
            buffer: Vec::with_capacity(threshold),
            threshold,
            appended_since_flush: 0,
            total_appended: 0,
        })
    }

    /// Add a reading to the tail of the buffer
    pub fn append(&mut self, reading: Reading) {
        self.buffer.push(reading);
        self.appended_since_flush += 1;
        self.total_appended += 1;
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.threshold
    }

    /// Take the buffered readings as a batch once the threshold is reached
    pub fn flush_if_full(&mut self) -> Option<Batch> {
        if !self.is_full() {
            return None;
        }
        Some(self.take())
    }

    /// Take whatever is buffered, full or not. Used on stop.
    pub fn take_partial(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> Batch {
        let readings = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.threshold));
        self.appended_since_flush = 0;
        Batch::from_readings(readings)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn appended_since_flush(&self) -> u64 {
        self.appended_since_flush
    }

    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}
