//! Process-wide counters for gate generation.
//!
//! Counters are bumped by the generator as results are produced. Call
//! [`Metrics::flush`] at the end of a run to emit them as one
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::generate::GenerateKind;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    sequences_processed: AtomicU64,
    files_created: AtomicU64,
    files_skipped: AtomicU64,
    files_existing: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            sequences_processed: AtomicU64::new(0),
            files_created: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_existing: AtomicU64::new(0),
        }
    }

    pub fn inc_sequences(&self) {
        self.sequences_processed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sequences_processed", "counter incremented");
    }

    /// Count one generation result under its kind.
    pub fn record(&self, kind: GenerateKind) {
        let (counter, metric) = match kind {
            GenerateKind::Create => (&self.files_created, "files_created"),
            GenerateKind::Skip => (&self.files_skipped, "files_skipped"),
            GenerateKind::Exists => (&self.files_existing, "files_existing"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric, "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            sequences_processed = self.sequences_processed(),
            files_created = self.files_created(),
            files_skipped = self.files_skipped(),
            files_existing = self.files_existing(),
        );
    }

    pub fn sequences_processed(&self) -> u64 {
        self.sequences_processed.load(Ordering::Relaxed)
    }

    pub fn files_created(&self) -> u64 {
        self.files_created.load(Ordering::Relaxed)
    }

    pub fn files_skipped(&self) -> u64 {
        self.files_skipped.load(Ordering::Relaxed)
    }

    pub fn files_existing(&self) -> u64 {
        self.files_existing.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn reset(&self) {
        self.sequences_processed.store(0, Ordering::Relaxed);
        self.files_created.store(0, Ordering::Relaxed);
        self.files_skipped.store(0, Ordering::Relaxed);
        self.files_existing.store(0, Ordering::Relaxed);
    }
}
