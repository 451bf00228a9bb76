//! Host application state shared by the REPL loop and event-forwarding tasks.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use digiconvo_core::engine::TurnSnapshot;
use digiconvo_core::playback::PlaybackSnapshot;
use digiconvo_core::{ConversationBackend, ConversationEngine};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::settings::AppSettings;
use crate::storage::LocalStore;

/// Shared application state; cheap to clone.
pub struct AppState<B> {
    /// The core engine. Wrapped in `Arc` so forwarding tasks can hold it.
    pub engine: Arc<ConversationEngine<B>>,
    /// Persisted app settings cache.
    pub settings: Arc<Mutex<AppSettings>>,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    /// Local SQLite session history.
    pub store: Arc<LocalStore>,
    /// Rolling stage latency metrics.
    pub perf_metrics: Arc<Mutex<PerfMetrics>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            settings: Arc::clone(&self.settings),
            settings_path: self.settings_path.clone(),
            store: Arc::clone(&self.store),
            perf_metrics: Arc::clone(&self.perf_metrics),
        }
    }
}

impl<B: ConversationBackend> AppState<B> {
    pub fn new(
        engine: Arc<ConversationEngine<B>>,
        settings: AppSettings,
        settings_path: PathBuf,
        store: Arc<LocalStore>,
    ) -> Self {
        Self {
            engine,
            settings: Arc::new(Mutex::new(settings)),
            settings_path,
            store,
            perf_metrics: Arc::new(Mutex::new(PerfMetrics::default())),
        }
    }

    /// Write the current transcript to history, if history is enabled.
    /// Returns the number of newly stored messages.
    pub fn persist_session(&self) -> usize {
        if !self.settings.lock().history_enabled {
            return 0;
        }
        let snapshot = self.engine.snapshot();
        let started = Instant::now();
        let stored = match self.store.record_session(&snapshot) {
            Ok(n) => n,
            Err(e) => {
                warn!(session_id = %snapshot.session_id, "failed to persist session: {e}");
                0
            }
        };
        self.perf_metrics
            .lock()
            .record_persist(started.elapsed().as_secs_f64() * 1000.0);
        stored
    }

    pub fn diagnostics_snapshot(&self) -> AppDiagnostics {
        AppDiagnostics {
            turns: self.engine.turn_diagnostics_snapshot(),
            playback: self.engine.playback_diagnostics_snapshot(),
        }
    }

    pub fn perf_snapshot(&self) -> PerfSnapshot {
        let metrics = self.perf_metrics.lock().snapshot();
        PerfSnapshot {
            diagnostics: self.diagnostics_snapshot(),
            turn_ms: metrics.turn_ms,
            persist_ms: metrics.persist_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDiagnostics {
    pub turns: TurnSnapshot,
    pub playback: PlaybackSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSnapshot {
    pub diagnostics: AppDiagnostics,
    pub turn_ms: PerfStageSnapshot,
    pub persist_ms: PerfStageSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfStageSnapshot {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Default)]
pub struct PerfMetrics {
    turn_ms: StageWindow,
    persist_ms: StageWindow,
}

impl PerfMetrics {
    /// Submit-to-settled time of one turn (both backend tasks done).
    pub fn record_turn(&mut self, elapsed_ms: f64) {
        self.turn_ms.record(elapsed_ms);
    }

    pub fn record_persist(&mut self, elapsed_ms: f64) {
        self.persist_ms.record(elapsed_ms);
    }

    pub fn snapshot(&self) -> PerfMetricsSnapshot {
        PerfMetricsSnapshot {
            turn_ms: self.turn_ms.snapshot(),
            persist_ms: self.persist_ms.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerfMetricsSnapshot {
    pub turn_ms: PerfStageSnapshot,
    pub persist_ms: PerfStageSnapshot,
}

#[derive(Debug)]
struct StageWindow {
    samples: VecDeque<f64>,
    cap: usize,
    count: usize,
    sum_ms: f64,
    max_ms: f64,
}

impl Default for StageWindow {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(128),
            cap: 128,
            count: 0,
            sum_ms: 0.0,
            max_ms: 0.0,
        }
    }
}

impl StageWindow {
    fn record(&mut self, elapsed_ms: f64) {
        let v = if elapsed_ms.is_finite() {
            elapsed_ms.max(0.0)
        } else {
            0.0
        };
        if self.samples.len() == self.cap {
            let _ = self.samples.pop_front();
        }
        self.samples.push_back(v);
        self.count = self.count.saturating_add(1);
        self.sum_ms += v;
        self.max_ms = self.max_ms.max(v);
    }

    fn snapshot(&self) -> PerfStageSnapshot {
        if self.samples.is_empty() {
            return PerfStageSnapshot::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        // Nearest-rank over the retained window.
        let percentile = |p: f64| -> f64 {
            let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        PerfStageSnapshot {
            count: self.count,
            mean_ms: self.sum_ms / self.count as f64,
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            max_ms: self.max_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_window_reports_zeros() {
        let metrics = PerfMetrics::default();
        assert_eq!(metrics.snapshot().turn_ms, PerfStageSnapshot::default());
    }

    #[test]
    fn window_tracks_percentiles_and_clamps_bad_samples() {
        let mut metrics = PerfMetrics::default();
        for ms in 1..=100 {
            metrics.record_turn(ms as f64);
        }
        metrics.record_persist(f64::NAN);
        metrics.record_persist(-4.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.turn_ms.count, 100);
        assert_relative_eq!(snap.turn_ms.mean_ms, 50.5);
        assert_relative_eq!(snap.turn_ms.p50_ms, 51.0);
        assert_relative_eq!(snap.turn_ms.p95_ms, 95.0);
        assert_relative_eq!(snap.turn_ms.max_ms, 100.0);

        assert_eq!(snap.persist_ms.count, 2);
        assert_relative_eq!(snap.persist_ms.max_ms, 0.0);
    }

    #[test]
    fn window_keeps_only_recent_samples() {
        let mut window = StageWindow::default();
        for _ in 0..200 {
            window.record(1000.0);
        }
        for _ in 0..128 {
            window.record(2.0);
        }
        let snap = window.snapshot();
        assert_eq!(snap.count, 328);
        assert_relative_eq!(snap.p99_ms, 2.0);
        assert_relative_eq!(snap.max_ms, 1000.0);
    }
}
