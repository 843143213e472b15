//! In-memory gaze and event log for the active subscription.
//!
//! The vendor callback appends through a [`SharedBuffer`] clone on its own
//! thread; the frame loop reads the latest sample and drains on stop.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::gaze::{EventRecord, GazeSample};

/// Append-only log of gaze samples and events for one recording session.
#[derive(Debug, Default)]
pub struct GazeBuffer {
    samples: Vec<GazeSample>,
    events: Vec<EventRecord>,
}

impl GazeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_sample(&mut self, sample: GazeSample) {
        self.samples.push(sample);
    }

    pub fn append_event(&mut self, timestamp: i64, label: impl Into<String>) {
        self.events.push(EventRecord::new(timestamp, label));
    }

    /// `None` until the first sample arrives.
    pub fn latest_sample(&self) -> Option<&GazeSample> {
        self.samples.last()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Takes everything recorded so far, leaving the buffer empty.
    pub fn drain(&mut self) -> (Vec<GazeSample>, Vec<EventRecord>) {
        (
            std::mem::take(&mut self.samples),
            std::mem::take(&mut self.events),
        )
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.events.clear();
    }
}

/// Handle shared between the tracker's delivery thread and the frame loop.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<GazeBuffer>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, GazeBuffer> {
        // a panicking writer cannot leave a half-pushed Vec behind
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append_sample(&self, sample: GazeSample) {
        self.lock().append_sample(sample);
    }

    pub fn latest_sample(&self) -> Option<GazeSample> {
        self.lock().latest_sample().copied()
    }

    /// Per-eye gaze validity of the latest sample.
    pub fn latest_validity(&self) -> Option<(bool, bool)> {
        self.latest_sample().map(|s| s.validity())
    }
}
