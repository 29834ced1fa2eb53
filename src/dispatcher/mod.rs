pub mod admission;
pub mod monitor;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetch::{FetchEngine, FetchResult};
use crate::settings::AdmissionPolicy;
use admission::{AdmissionController, ResourceProbe, SystemMemory};
use monitor::Monitor;

/// Counts reported once a batch has fully drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub peak_in_flight: usize,
}

/// Fans a URL list out to the fetch engine under the admission policy.
pub struct Dispatcher {
    engine: Arc<dyn FetchEngine>,
    policy: AdmissionPolicy,
    probe: Arc<dyn ResourceProbe>,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn FetchEngine>, policy: AdmissionPolicy) -> Self {
        Self {
            engine,
            policy,
            probe: Arc::new(SystemMemory),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Fetch every URL and hand each result to `on_result` as it completes.
    ///
    /// Every input URL yields exactly one call, in completion order. A failed
    /// fetch never affects the others, and the batch has no overall timeout:
    /// it ends when the last URL has reported.
    pub async fn dispatch<F>(&self, label: &'static str, urls: Vec<String>, mut on_result: F) -> DispatchStats
    where
        F: FnMut(FetchResult),
    {
        let total = urls.len();
        if total == 0 {
            return DispatchStats::default();
        }

        let admission = Arc::new(AdmissionController::new(&self.policy, Arc::clone(&self.probe)));
        let monitor = Monitor::start(label, total, &self.policy, Arc::clone(&admission));

        // Channel: workers send results, this loop is the only consumer
        let capacity = self.policy.max_concurrent_fetches.max(1) * 2;
        let (tx, mut rx) = mpsc::channel::<(usize, FetchResult)>(capacity);

        for (idx, url) in urls.iter().cloned().enumerate() {
            let engine = Arc::clone(&self.engine);
            let admission = Arc::clone(&admission);
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = match admission.admit().await {
                    Ok(permit) => {
                        let fetched = engine.fetch(&url).await;
                        drop(permit);
                        match fetched {
                            Ok(html) => FetchResult::Success { url, html },
                            Err(error) => FetchResult::Failure { url, error },
                        }
                    }
                    Err(_) => FetchResult::Failure {
                        url,
                        error: FetchError::Aborted,
                    },
                };
                let _ = tx.send((idx, result)).await;
            });
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        let mut stats = DispatchStats {
            total,
            ..DispatchStats::default()
        };
        let mut reported = vec![false; total];

        while let Some((idx, result)) = rx.recv().await {
            reported[idx] = true;
            stats.tally(&result);
            monitor.inc();
            debug!("{} reported ({}/{})", result.url(), stats.ok + stats.errors, total);
            on_result(result);
        }

        // A task that panicked never sent; it still owes its URL a result.
        for (url, _) in urls.into_iter().zip(reported).filter(|(_, done)| !done) {
            warn!("Fetch task for {} died without reporting", url);
            let result = FetchResult::Failure {
                url,
                error: FetchError::Aborted,
            };
            stats.tally(&result);
            monitor.inc();
            on_result(result);
        }

        stats.peak_in_flight = admission.snapshot().peak_in_flight;
        monitor.finish();
        info!(
            "{}: fetched {} pages ({} ok, {} errors, peak {} in flight)",
            label, stats.total, stats.ok, stats.errors, stats.peak_in_flight
        );
        stats
    }
}

impl DispatchStats {
    fn tally(&mut self, result: &FetchResult) {
        if result.is_success() {
            self.ok += 1;
        } else {
            self.errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::scripted::ScriptedEngine;
    use std::collections::HashSet;
    use std::time::Duration;

    fn policy(max: usize) -> AdmissionPolicy {
        AdmissionPolicy {
            max_concurrent_fetches: max,
            memory_threshold_percent: 0.0,
            monitoring_enabled: false,
            ..AdmissionPolicy::default()
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://example.test/listing-{}", i)).collect()
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        let dispatcher = Dispatcher::new(Arc::new(ScriptedEngine::new()), policy(4));
        let mut calls = 0;
        let stats = dispatcher.dispatch("test", Vec::new(), |_| calls += 1).await;
        assert_eq!(stats, DispatchStats::default());
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn every_url_reports_exactly_once() {
        let input = urls(40);
        let mut engine = ScriptedEngine::new().with_delay(Duration::from_millis(2));
        for (i, url) in input.iter().enumerate() {
            engine = if i % 3 == 0 {
                engine.failing(url, FetchError::Timeout)
            } else {
                engine.page(url, "<html></html>")
            };
        }
        let dispatcher = Dispatcher::new(Arc::new(engine), policy(5));

        let mut seen = Vec::new();
        let stats = dispatcher
            .dispatch("test", input.clone(), |r| seen.push(r.url().to_string()))
            .await;

        assert_eq!(stats.total, 40);
        assert_eq!(stats.ok + stats.errors, 40);
        assert_eq!(stats.errors, 14);
        assert_eq!(seen.len(), 40);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 40);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_cap() {
        let input = urls(30);
        let mut engine = ScriptedEngine::new().with_delay(Duration::from_millis(10));
        for url in &input {
            engine = engine.page(url, "<html></html>");
        }
        let engine = Arc::new(engine);
        let dispatcher = Dispatcher::new(engine.clone(), policy(3));

        let stats = dispatcher.dispatch("test", input, |_| {}).await;

        assert_eq!(engine.calls(), 30);
        assert!(engine.max_in_flight() <= 3, "saw {}", engine.max_in_flight());
        assert!(stats.peak_in_flight <= 3);
        assert_eq!(stats.ok, 30);
    }

    #[tokio::test]
    async fn panicking_fetch_becomes_a_failure() {
        let input = urls(3);
        let engine = ScriptedEngine::new()
            .page(&input[0], "<html></html>")
            .panicking(&input[1])
            .page(&input[2], "<html></html>");
        let dispatcher = Dispatcher::new(Arc::new(engine), policy(2));

        let mut failures = Vec::new();
        let stats = dispatcher
            .dispatch("test", input.clone(), |r| {
                if let FetchResult::Failure { url, error } = r {
                    failures.push((url, error));
                }
            })
            .await;

        assert_eq!(stats.ok, 2);
        assert_eq!(failures, vec![(input[1].clone(), FetchError::Aborted)]);
    }

    #[tokio::test]
    async fn constant_memory_pressure_still_drains_the_batch() {
        struct Swamped;
        impl ResourceProbe for Swamped {
            fn memory_used_percent(&self) -> Option<f64> {
                Some(99.0)
            }
        }

        let input = urls(5);
        let mut engine = ScriptedEngine::new();
        for url in &input {
            engine = engine.page(url, "<html></html>");
        }
        let dispatcher = Dispatcher::new(
            Arc::new(engine),
            AdmissionPolicy {
                memory_threshold_percent: 80.0,
                check_interval_ms: 5,
                ..policy(4)
            },
        )
        .with_probe(Arc::new(Swamped));

        let stats = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch("test", input, |_| {}))
            .await
            .expect("batch must finish under pressure");
        assert_eq!(stats.ok, 5);
    }
}
