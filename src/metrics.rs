use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Mode;

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    chunks_indexed: AtomicU64,
    general_turns: AtomicU64,
    document_turns: AtomicU64,
    map_reduce_runs: AtomicU64,
    failed_windows: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a knowledge-base document and the number of chunks stored for it.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a completed turn in `mode`.
    pub fn record_turn(&self, mode: Mode) {
        let counter = match mode {
            Mode::GeneralQa => &self.general_turns,
            Mode::DocumentQa => &self.document_turns,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a map-reduce run and how many of its windows failed.
    pub fn record_map_reduce(&self, failed_windows: u64) {
        self.map_reduce_runs.fetch_add(1, Ordering::Relaxed);
        self.failed_windows
            .fetch_add(failed_windows, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            general_turns: self.general_turns.load(Ordering::Relaxed),
            document_turns: self.document_turns.load(Ordering::Relaxed),
            map_reduce_runs: self.map_reduce_runs.load(Ordering::Relaxed),
            failed_windows: self.failed_windows.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    /// Knowledge-base documents ingested since startup.
    pub documents_ingested: u64,
    /// Chunks stored across all ingested documents.
    pub chunks_indexed: u64,
    /// Turns answered from the knowledge base.
    pub general_turns: u64,
    /// Turns answered from an uploaded document.
    pub document_turns: u64,
    /// Map-reduce runs, translations included.
    pub map_reduce_runs: u64,
    /// Windows replaced by a failure marker.
    pub failed_windows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_indexed, 5);
    }

    #[test]
    fn turns_are_counted_per_mode() {
        let metrics = PipelineMetrics::new();
        metrics.record_turn(Mode::GeneralQa);
        metrics.record_turn(Mode::DocumentQa);
        metrics.record_turn(Mode::DocumentQa);
        metrics.record_map_reduce(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.general_turns, 1);
        assert_eq!(snapshot.document_turns, 2);
        assert_eq!(snapshot.map_reduce_runs, 1);
        assert_eq!(snapshot.failed_windows, 1);
    }

    #[test]
    fn fresh_snapshot_is_zeroed() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.documents_ingested, 0);
        assert_eq!(snapshot.document_turns, 0);
    }
}
