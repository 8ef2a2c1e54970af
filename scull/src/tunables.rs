//! Process-wide tunables
//!
//! Stores read segment and set size here when they are trimmed, pipes read
//! the ring size when their storage is allocated. Control verbs change them;
//! nothing already allocated is resized.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::DriverConfig;

#[derive(Debug)]
pub struct Tunables {
    segment_size: AtomicUsize,
    set_size: AtomicUsize,
    pipe_buffer: AtomicUsize,
    defaults: (usize, usize),
}

impl Tunables {
    #[must_use]
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            segment_size: AtomicUsize::new(config.segment_size),
            set_size: AtomicUsize::new(config.set_size),
            pipe_buffer: AtomicUsize::new(config.pipe_buffer),
            defaults: (config.segment_size, config.set_size),
        }
    }

    #[must_use]
    pub fn segment_size(&self) -> usize {
        self.segment_size.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn set_size(&self) -> usize {
        self.set_size.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pipe_buffer(&self) -> usize {
        self.pipe_buffer.load(Ordering::SeqCst)
    }

    pub fn set_segment_size(&self, value: usize) {
        self.segment_size.store(value, Ordering::SeqCst);
    }

    pub fn set_set_size(&self, value: usize) {
        self.set_size.store(value, Ordering::SeqCst);
    }

    pub fn set_pipe_buffer(&self, value: usize) {
        self.pipe_buffer.store(value, Ordering::SeqCst);
    }

    /// Store `value` and return the previous segment size in one step
    pub fn swap_segment_size(&self, value: usize) -> usize {
        self.segment_size.swap(value, Ordering::SeqCst)
    }

    /// Store `value` and return the previous set size in one step
    pub fn swap_set_size(&self, value: usize) -> usize {
        self.set_size.swap(value, Ordering::SeqCst)
    }

    /// Restore segment and set size to the configured defaults.
    /// The pipe ring size is left alone.
    pub fn reset(&self) {
        self.set_segment_size(self.defaults.0);
        self.set_set_size(self.defaults.1);
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(&DriverConfig::default())
    }
}
