//! Rolling request health for a scrape run.
//!
//! Keeps the last `window` attempt outcomes and response times. Once the
//! window is full, every new sample re-checks the thresholds and warns when
//! the success rate or latency degrades.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration for the monitor's window and alert thresholds.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub window: usize,
    /// Warn when the windowed success rate falls below this fraction.
    pub min_success_rate: f64,
    /// Warn when the windowed average response time exceeds this.
    pub max_avg_response: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: 100,
            min_success_rate: 0.8,
            max_avg_response: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct MonitorInner {
    outcomes: VecDeque<bool>,
    response_times: VecDeque<Duration>,
    total_requests: u64,
    failed_requests: u64,
    total_records: u64,
}

/// Snapshot of the monitor state.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStats {
    pub success_rate: Option<f64>,
    pub avg_response_time: Option<Duration>,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_records: u64,
}

/// Thread-safe monitor shared by all clones.
#[derive(Debug, Clone, Default)]
pub struct ScrapeMonitor {
    config: MonitorConfig,
    inner: Arc<Mutex<MonitorInner>>,
}

impl ScrapeMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(MonitorInner::default())),
        }
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned monitor mutex");
            poisoned.into_inner()
        })
    }

    /// Record one transport attempt.
    pub fn record_attempt(&self, success: bool, elapsed: Duration) {
        let mut inner = self.lock_inner();
        let window = self.config.window.max(1);

        inner.total_requests += 1;
        if !success {
            inner.failed_requests += 1;
        }
        if inner.outcomes.len() == window {
            inner.outcomes.pop_front();
            inner.response_times.pop_front();
        }
        inner.outcomes.push_back(success);
        inner.response_times.push_back(elapsed);

        if inner.outcomes.len() == window {
            let rate = success_rate(&inner.outcomes);
            let avg = average(&inner.response_times);
            if rate < self.config.min_success_rate {
                tracing::warn!(
                    success_rate = %format!("{:.1}%", rate * 100.0),
                    "Success rate dropped; consider more proxies or a slower request rate"
                );
            }
            if avg > self.config.max_avg_response {
                tracing::warn!(avg_ms = avg.as_millis() as u64, "Slow responses");
            }
        }
    }

    pub fn record_records(&self, count: usize) {
        self.lock_inner().total_records += count as u64;
    }

    pub fn stats(&self) -> MonitorStats {
        let inner = self.lock_inner();
        MonitorStats {
            success_rate: (!inner.outcomes.is_empty()).then(|| success_rate(&inner.outcomes)),
            avg_response_time: (!inner.response_times.is_empty())
                .then(|| average(&inner.response_times)),
            total_requests: inner.total_requests,
            failed_requests: inner.failed_requests,
            total_records: inner.total_records,
        }
    }
}

fn success_rate(outcomes: &VecDeque<bool>) -> f64 {
    outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64
}

fn average(times: &VecDeque<Duration>) -> Duration {
    let total: Duration = times.iter().sum();
    total / times.len() as u32
}
