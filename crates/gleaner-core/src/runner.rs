//! Bounded concurrent execution of per-target operations.
//!
//! Targets are queued once (duplicates collapse) and drained by at most
//! `max_workers` workers. Each operation runs in its own task, so a panic or
//! error in one target never affects its siblings.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Per-target outcome of a batch run.
pub type BatchResults<T> = HashMap<String, Result<T, AppError>>;

/// Events emitted by the runner for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RunnerEvent<'a> {
    Started { targets: usize, workers: usize },
    TargetStarted { worker: usize, target: &'a str },
    TargetSucceeded { worker: usize, target: &'a str },
    TargetFailed { worker: usize, target: &'a str, error: &'a AppError },
    Finished { succeeded: usize, failed: usize },
}

/// Trait for receiving runner events (decoupled logging).
pub trait RunnerReporter: Send + Sync {
    fn report(&self, event: RunnerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunnerReporter;

impl RunnerReporter for TracingRunnerReporter {
    fn report(&self, event: RunnerEvent<'_>) {
        match event {
            RunnerEvent::Started { targets, workers } => {
                tracing::info!(targets, workers, "Batch started");
            }
            RunnerEvent::TargetStarted { worker, target } => {
                tracing::info!(worker, %target, "Processing target");
            }
            RunnerEvent::TargetSucceeded { worker, target } => {
                tracing::info!(worker, %target, "Target completed");
            }
            RunnerEvent::TargetFailed {
                worker,
                target,
                error,
            } => {
                tracing::warn!(worker, %target, %error, "Target failed");
            }
            RunnerEvent::Finished { succeeded, failed } => {
                tracing::info!(succeeded, failed, "Batch finished");
            }
        }
    }
}

/// Runs one async operation per target with a concurrency ceiling.
#[derive(Debug, Clone)]
pub struct BoundedRunner<R = TracingRunnerReporter> {
    max_workers: usize,
    cancel: CancellationToken,
    reporter: Arc<R>,
}

impl BoundedRunner<TracingRunnerReporter> {
    /// `max_workers` of 0 is treated as 1.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel: CancellationToken::new(),
            reporter: Arc::new(TracingRunnerReporter),
        }
    }
}

impl<R: RunnerReporter + 'static> BoundedRunner<R> {
    pub fn with_reporter<R2: RunnerReporter + 'static>(self, reporter: R2) -> BoundedRunner<R2> {
        BoundedRunner {
            max_workers: self.max_workers,
            cancel: self.cancel,
            reporter: Arc::new(reporter),
        }
    }

    /// Targets not yet started when the token fires end as `Cancelled`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `op` once per distinct target and wait for all of them.
    ///
    /// The returned map has exactly one entry per distinct target.
    pub async fn run<T, F, Fut>(
        &self,
        targets: impl IntoIterator<Item = String>,
        op: F,
    ) -> BatchResults<T>
    where
        T: Send + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let mut seen = HashSet::new();
        let targets: Vec<String> = targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        let workers = self.max_workers.min(targets.len());
        self.reporter.report(RunnerEvent::Started {
            targets: targets.len(),
            workers,
        });

        let (tx, rx) = mpsc::channel(targets.len().max(1));
        for target in &targets {
            // Capacity covers every target, so this never waits.
            let _ = tx.send(target.clone()).await;
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let op = Arc::new(op);
        let mut set = JoinSet::new();

        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            let op = Arc::clone(&op);
            let cancel = self.cancel.clone();
            let reporter = Arc::clone(&self.reporter);

            set.spawn(async move {
                let mut done = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(target) = rx.lock().await.recv().await else {
                        break;
                    };

                    reporter.report(RunnerEvent::TargetStarted {
                        worker,
                        target: &target,
                    });
                    let outcome = match tokio::spawn(op(target.clone())).await {
                        Ok(result) => result,
                        Err(join) => Err(AppError::TaskFailed(join.to_string())),
                    };
                    match &outcome {
                        Ok(_) => reporter.report(RunnerEvent::TargetSucceeded {
                            worker,
                            target: &target,
                        }),
                        Err(error) => reporter.report(RunnerEvent::TargetFailed {
                            worker,
                            target: &target,
                            error,
                        }),
                    }
                    done.push((target, outcome));
                }
                done
            });
        }

        let mut results: BatchResults<T> = HashMap::with_capacity(targets.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => results.extend(done),
                Err(e) => tracing::error!(error = %e, "Runner worker aborted"),
            }
        }

        for target in targets {
            results.entry(target).or_insert(Err(AppError::Cancelled));
        }

        let (succeeded, failed) = summarize(&results);
        self.reporter
            .report(RunnerEvent::Finished { succeeded, failed });
        results
    }
}

/// `(succeeded, failed)` counts of a batch.
pub fn summarize<T>(results: &BatchResults<T>) -> (usize, usize) {
    let succeeded = results.values().filter(|r| r.is_ok()).count();
    (succeeded, results.len() - succeeded)
}
