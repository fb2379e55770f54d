use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters surfaced by `GET /health`. All monotonic; gauges are derived
/// from the live stores at snapshot time.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub calls_placed: AtomicU64,
    pub calls_received: AtomicU64,
    pub retried_invites: AtomicU64,
    pub re_invites: AtomicU64,
    pub dtmf_digits_received: AtomicU64,
    pub relay_requests: AtomicU64,
    pub relay_retries: AtomicU64,
    pub relay_failures: AtomicU64,
    pub transaction_timeouts: AtomicU64,
    pub ack_timeouts: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub calls_placed: u64,
    pub calls_received: u64,
    pub retried_invites: u64,
    pub re_invites: u64,
    pub dtmf_digits_received: u64,
    pub transaction_timeouts: u64,
    pub ack_timeouts: u64,
    pub relay: RelayMetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetricsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub failures: u64,
}

impl GatewayMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_placed: self.calls_placed.load(Ordering::Relaxed),
            calls_received: self.calls_received.load(Ordering::Relaxed),
            retried_invites: self.retried_invites.load(Ordering::Relaxed),
            re_invites: self.re_invites.load(Ordering::Relaxed),
            dtmf_digits_received: self.dtmf_digits_received.load(Ordering::Relaxed),
            transaction_timeouts: self.transaction_timeouts.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            relay: RelayMetricsSnapshot {
                requests: self.relay_requests.load(Ordering::Relaxed),
                retries: self.relay_retries.load(Ordering::Relaxed),
                failures: self.relay_failures.load(Ordering::Relaxed),
            },
        }
    }
}
