//! Health reporting for session pools

#[cfg(feature = "serde")]
use serde::Serialize;

/// Health status of a session pool
///
/// # Examples
///
/// ```
/// use esox_sessionpool::HealthStatus;
///
/// let health = HealthStatus::new(2, 1, 4, false);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_sessions, 2);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct HealthStatus {
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// In-use sessions relative to the ceiling (0.0 to 1.0)
    pub utilization: f64,

    pub idle_sessions: usize,

    pub sessions_in_use: usize,

    pub max_connections: usize,

    /// Whether a drain is in progress
    pub draining: bool,

    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(idle: usize, in_use: usize, max_connections: usize, draining: bool) -> Self {
        let utilization = if max_connections > 0 {
            in_use as f64 / max_connections as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if max_connections == 0 {
            warnings.push("maxConnections is zero, no session can be created".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        // Saturated: the next acquire will have to wait
        if idle == 0 && max_connections > 0 && in_use >= max_connections {
            warnings.push("No idle sessions and ceiling reached".to_string());
        }

        if draining {
            warnings.push("Pool is draining".to_string());
            is_healthy = false;
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_sessions: idle,
            sessions_in_use: in_use,
            max_connections,
            draining,
            warnings,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturated_pool_warns() {
        let health = HealthStatus::new(0, 4, 4, false);
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
        assert_eq!(health.utilization, 1.0);
    }

    #[test]
    fn test_draining_is_unhealthy() {
        let health = HealthStatus::new(1, 0, 4, true);
        assert!(!health.is_healthy());
        assert!(health.warnings.iter().any(|w| w.contains("draining")));
    }

    #[test]
    fn test_zero_ceiling_is_unhealthy() {
        let health = HealthStatus::new(0, 0, 0, false);
        assert!(!health.is_healthy());
        assert_eq!(health.utilization, 0.0);
    }
}
