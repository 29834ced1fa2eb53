use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::admission::AdmissionController;
use crate::settings::AdmissionPolicy;

struct AbortTaskOnDrop(tokio::task::AbortHandle);

impl Drop for AbortTaskOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Progress bar for one batch plus, when enabled, a background task that
/// logs admission counters and memory usage on an interval.
pub struct Monitor {
    pb: ProgressBar,
    _telemetry: Option<AbortTaskOnDrop>,
}

impl Monitor {
    pub fn start(
        label: &'static str,
        total: usize,
        policy: &AdmissionPolicy,
        admission: Arc<AdmissionController>,
    ) -> Self {
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        let telemetry = policy.monitoring_enabled.then(|| {
            let interval = policy.monitor_interval();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let c = admission.snapshot();
                    let memory = admission
                        .memory_used_percent()
                        .map(|m| format!("{:.1}%", m))
                        .unwrap_or_else(|| "n/a".into());
                    info!(
                        pass = label,
                        in_flight = c.in_flight,
                        peak = c.peak_in_flight,
                        completed = c.completed,
                        total,
                        memory = %memory,
                        "progress"
                    );
                }
            });
            AbortTaskOnDrop(task.abort_handle())
        });

        Self {
            pb,
            _telemetry: telemetry,
        }
    }

    pub fn inc(&self) {
        self.pb.inc(1);
    }

    pub fn finish(self) {
        self.pb.finish_and_clear();
    }
}
