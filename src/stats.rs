use std::sync::{Arc, Mutex};

/// Running per-stage timing aggregate.
#[derive(Clone, Debug, Default)]
pub struct StageStats {
    pub samples: u64,
    pub total_ns: u128,
    pub max_ns: u64,
}

impl StageStats {
    pub fn record(&mut self, duration_ns: u64) {
        self.samples += 1;
        self.total_ns += duration_ns as u128;
        self.max_ns = self.max_ns.max(duration_ns);
    }

    pub fn avg_ns(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ns as f64 / self.samples as f64
        }
    }
}

/// Counters and stage timings for the capture pipeline.
#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub read_errors: u64,
    pub device_reopens: u64,
    pub processor_errors: u64,

    pub wake_detections: u64,
    pub false_wakes: u64,
    pub turns_committed: u64,
    pub turns_aborted: u64,
    pub stt_open_failures: u64,
    pub stt_push_failures: u64,

    pub echo_stage: StageStats,
    pub suppress_stage: StageStats,
    pub frame_step: StageStats,
}

/// Shared handle the capture thread writes and any thread may snapshot.
#[derive(Clone)]
pub struct RuntimeStatsHandle {
    inner: Arc<Mutex<RuntimeStats>>,
}

impl RuntimeStatsHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RuntimeStats::default())),
        }
    }

    pub fn reset(&self) {
        if let Ok(mut stats) = self.inner.lock() {
            *stats = RuntimeStats::default();
        }
    }

    pub fn update<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut RuntimeStats),
    {
        if let Ok(mut stats) = self.inner.lock() {
            update_fn(&mut stats);
        }
    }

    pub fn snapshot(&self) -> RuntimeStats {
        if let Ok(stats) = self.inner.lock() {
            stats.clone()
        } else {
            RuntimeStats::default()
        }
    }
}

impl Default for RuntimeStatsHandle {
    fn default() -> Self {
        Self::new()
    }
}
