//! Process memory gauge.
//!
//! Samples the resident memory of this process once per export cycle and
//! reports it as `process_memory_usage_bytes`.

use std::sync::Mutex;

use metrics::Unit;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::observability::metrics::{lock, MetricsRegistry};

pub const MEMORY_USAGE: &str = "process_memory_usage_bytes";

struct ProcessMemory {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessMemory {
    fn sample(&self) -> Option<f64> {
        let mut system = lock(&self.system);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(self.pid).map(|process| process.memory() as f64)
    }
}

/// Register the memory gauge on the shared meter.
///
/// Returns `false` when metrics are not initialized or the platform cannot
/// identify the current process; the service runs without the gauge.
pub fn start_memory_monitoring(registry: &MetricsRegistry) -> bool {
    let Some(meter) = registry.meter() else {
        tracing::debug!("Metrics not initialized; memory gauge skipped");
        return false;
    };

    let pid = match get_current_pid() {
        Ok(pid) => pid,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot resolve own pid; memory gauge skipped");
            return false;
        }
    };

    let source = ProcessMemory {
        pid,
        system: Mutex::new(System::new()),
    };
    meter.observable_gauge(
        MEMORY_USAGE,
        "Resident memory of the service process",
        Unit::Bytes,
        move || source.sample(),
    );

    tracing::debug!("Memory gauge registered");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::MetricsConfig;
    use std::time::Duration;

    #[test]
    fn skipped_before_initialize() {
        let registry = MetricsRegistry::new();
        assert!(!start_memory_monitoring(&registry));
    }

    #[tokio::test]
    async fn reports_resident_memory() {
        let registry = MetricsRegistry::new();
        let shutdown = registry.initialize(&MetricsConfig::default()).unwrap();
        assert!(start_memory_monitoring(&registry));

        let rendered = registry.meter().unwrap().render().unwrap();
        let bytes: f64 = rendered
            .lines()
            .find(|line| line.starts_with(MEMORY_USAGE))
            .and_then(|line| line.rsplit(' ').next())
            .unwrap()
            .parse()
            .unwrap();
        assert!(bytes > 0.0);

        shutdown.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}
