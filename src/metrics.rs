//! Metrics collection and export for session pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Point-in-time metrics for a pool
///
/// # Examples
///
/// ```
/// use esox_sessionpool::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// let exported = metrics.export();
/// assert_eq!(exported["sessions_in_use"], "0");
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Successful acquisitions
    pub total_acquired: usize,

    /// Sessions returned to the idle set
    pub total_released: usize,

    /// Sessions opened through the provider
    pub sessions_created: usize,

    /// Sessions the pool closed (dead, drained, or abandoned creations)
    pub sessions_closed: usize,

    /// Idle sessions that failed their liveness probe
    pub probe_failures: usize,

    /// Sessions that could not be closed even by force
    pub close_failures: usize,

    /// Times an acquire had to wait for capacity
    pub wait_events: usize,

    pub sessions_in_use: usize,

    pub sessions_idle: usize,

    /// Current ceiling from the active configuration
    pub max_connections: usize,

    /// In-use sessions relative to the ceiling (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("sessions_created".to_string(), self.sessions_created.to_string());
        metrics.insert("sessions_closed".to_string(), self.sessions_closed.to_string());
        metrics.insert("probe_failures".to_string(), self.probe_failures.to_string());
        metrics.insert("close_failures".to_string(), self.close_failures.to_string());
        metrics.insert("wait_events".to_string(), self.wait_events.to_string());
        metrics.insert("sessions_in_use".to_string(), self.sessions_in_use.to_string());
        metrics.insert("sessions_idle".to_string(), self.sessions_idle.to_string());
        metrics.insert("max_connections".to_string(), self.max_connections.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "prometheus")]
pub struct MetricsExporter;

#[cfg(feature = "prometheus")]
impl MetricsExporter {
    /// Render metrics in the Prometheus text exposition format.
    ///
    /// Every series carries a `pool` label plus any extra `tags`. Tag names
    /// must be valid Prometheus label names.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_sessionpool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "uploads".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&PoolMetrics::default(), "ftp", Some(&tags)).unwrap();
    /// assert!(output.contains("sessionpool_sessions_in_use"));
    /// assert!(output.contains("service=\"uploads\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let registry = Registry::new();
        let labels = Self::format_labels(pool_name, tags);
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauges = [
            ("sessionpool_sessions_in_use", "Sessions currently checked out", metrics.sessions_in_use),
            ("sessionpool_sessions_idle", "Sessions waiting for reuse", metrics.sessions_idle),
            ("sessionpool_max_connections", "Configured session ceiling", metrics.max_connections),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("sessionpool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("sessionpool_acquired_total", "Sessions handed to callers", metrics.total_acquired),
            ("sessionpool_released_total", "Sessions returned by callers", metrics.total_released),
            ("sessionpool_created_total", "Sessions opened", metrics.sessions_created),
            ("sessionpool_closed_total", "Sessions closed by the pool", metrics.sessions_closed),
            ("sessionpool_probe_failures_total", "Idle sessions found dead", metrics.probe_failures),
            ("sessionpool_close_failures_total", "Sessions that failed to close", metrics.close_failures),
            ("sessionpool_wait_events_total", "Acquires that waited for capacity", metrics.wait_events),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }

        labels
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub sessions_created: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub probe_failures: AtomicUsize,
    pub close_failures: AtomicUsize,
    pub wait_events: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a pool-initiated close
    pub fn record_close(&self, closed: bool) {
        if closed {
            Self::incr(&self.sessions_closed);
        } else {
            Self::incr(&self.close_failures);
        }
    }

    pub fn get_metrics(&self, in_use: usize, idle: usize, max_connections: usize) -> PoolMetrics {
        let utilization = if max_connections > 0 {
            in_use as f64 / max_connections as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            wait_events: self.wait_events.load(Ordering::Relaxed),
            sessions_in_use: in_use,
            sessions_idle: idle,
            max_connections,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_with_zero_ceiling() {
        let tracker = MetricsTracker::new();
        let metrics = tracker.get_metrics(0, 0, 0);
        assert_eq!(metrics.utilization, 0.0);
    }

    #[test]
    fn test_record_close() {
        let tracker = MetricsTracker::new();
        tracker.record_close(true);
        tracker.record_close(true);
        tracker.record_close(false);

        let metrics = tracker.get_metrics(1, 1, 4);
        assert_eq!(metrics.sessions_closed, 2);
        assert_eq!(metrics.close_failures, 1);
        assert_eq!(metrics.utilization, 0.25);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_prometheus_export_has_pool_label() {
        let metrics = PoolMetrics {
            sessions_in_use: 2,
            max_connections: 4,
            utilization: 0.5,
            ..Default::default()
        };
        let output = MetricsExporter::export_prometheus(&metrics, "uploads", None).unwrap();
        assert!(output.contains("# TYPE sessionpool_sessions_in_use gauge"));
        assert!(output.contains("sessionpool_sessions_in_use{pool=\"uploads\"} 2"));
        assert!(output.contains("# TYPE sessionpool_created_total counter"));
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_prometheus_export_rejects_bad_label() {
        let mut tags = HashMap::new();
        tags.insert("not a label".to_string(), "x".to_string());
        assert!(MetricsExporter::export_prometheus(&PoolMetrics::default(), "p", Some(&tags)).is_err());
    }
}
