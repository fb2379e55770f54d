use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Events the signaling engine raises toward the browser hub. One variant
/// per user-visible call outcome; payload fields match the hub's wire
/// frames so forwarding is a straight translation.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Ringing {
        call_id: String,
    },
    Answered {
        call_id: String,
        sdp: String,
    },
    Failed {
        call_id: String,
        reason: String,
    },
    Ended {
        call_id: String,
        reason: String,
    },
    Incoming {
        call_id: String,
        from: String,
        to: String,
        sdp: String,
    },
    Dtmf {
        call_id: String,
        digit: char,
        duration: u32,
    },
    Renegotiation {
        call_id: String,
        sdp: String,
    },
}

impl CallEvent {
    pub fn call_id(&self) -> &str {
        match self {
            CallEvent::Ringing { call_id }
            | CallEvent::Answered { call_id, .. }
            | CallEvent::Failed { call_id, .. }
            | CallEvent::Ended { call_id, .. }
            | CallEvent::Incoming { call_id, .. }
            | CallEvent::Dtmf { call_id, .. }
            | CallEvent::Renegotiation { call_id, .. } => call_id,
        }
    }
}

pub type EventSender = UnboundedSender<CallEvent>;
pub type EventReceiver = UnboundedReceiver<CallEvent>;
