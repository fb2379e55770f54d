use std::time::Duration;

pub mod key;
pub mod store;
pub mod timer;

pub use key::TransactionKey;
pub use store::TransactionLayer;

pub const T1: Duration = Duration::from_millis(500);
pub const T2: Duration = Duration::from_secs(4);
/// Timer B (INVITE client), F (non-INVITE client) and H (ACK wait) are
/// all 64·T1.
pub const TIMER_B: Duration = Duration::from_secs(32);
pub const TIMER_F: Duration = Duration::from_secs(32);
pub const TIMER_H: Duration = Duration::from_secs(32);
/// How many times a final 2xx is re-sent before only Timer H remains.
pub const OK_RETRANSMIT_CAP: u32 = 7;
/// Poll cadence of the engine's timer task.
pub const TIMER_INTERVAL: Duration = Duration::from_millis(20);

/// Timer duties dispatched by the engine's timer loop. B/F belong to
/// client transactions; G (2xx retransmit) and H (ACK wait) belong to the
/// answering dialog and are keyed by call so they outlive the server
/// transaction record.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayTimer {
    TimerB(TransactionKey),
    TimerF(TransactionKey),
    TimerG {
        call_id: String,
        interval: Duration,
        attempt: u32,
    },
    TimerH {
        call_id: String,
    },
}

impl std::fmt::Display for GatewayTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayTimer::TimerB(key) => write!(f, "TimerB: {}", key),
            GatewayTimer::TimerF(key) => write!(f, "TimerF: {}", key),
            GatewayTimer::TimerG {
                call_id,
                interval,
                attempt,
            } => write!(
                f,
                "TimerG: {} attempt {} every {}ms",
                call_id,
                attempt,
                interval.as_millis()
            ),
            GatewayTimer::TimerH { call_id } => write!(f, "TimerH: {}", call_id),
        }
    }
}

/// The doubling-to-T2 backoff used for 2xx retransmissions.
pub fn next_retransmit_interval(current: Duration) -> Duration {
    (current * 2).min(T2)
}
