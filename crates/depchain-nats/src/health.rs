//! Health check for NATS event bus.

use crate::metrics::NatsMetrics;

/// Health status of the NATS connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Connected, but publishes or deliveries have failed.
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded { .. } => "degraded",
            HealthStatus::Unhealthy { .. } => "unhealthy",
        }
    }
}

/// Health check result with details.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub connected: bool,
    pub disconnects: u64,
    pub events_published: u64,
    pub events_received: u64,
    pub publish_failures: u64,
    pub decode_failures: u64,
    pub dead_lettered: u64,
}

impl HealthCheck {
    /// Create a health check from metrics.
    pub fn from_metrics(metrics: &NatsMetrics, connected: bool) -> Self {
        let snapshot = metrics.snapshot();

        let status = if !connected {
            HealthStatus::Unhealthy {
                reason: "Not connected to NATS".to_string(),
            }
        } else if snapshot.publish_failures > 0 {
            HealthStatus::Degraded {
                reason: format!("{} publish failures recorded", snapshot.publish_failures),
            }
        } else if snapshot.decode_failures > 0 {
            HealthStatus::Degraded {
                reason: format!("{} undecodable events received", snapshot.decode_failures),
            }
        } else if snapshot.dead_lettered > 0 {
            HealthStatus::Degraded {
                reason: format!("{} events dead-lettered", snapshot.dead_lettered),
            }
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            connected,
            disconnects: snapshot.disconnects,
            events_published: snapshot.total_published(),
            events_received: snapshot.total_received(),
            publish_failures: snapshot.publish_failures,
            decode_failures: snapshot.decode_failures,
            dead_lettered: snapshot.dead_lettered,
        }
    }
}
