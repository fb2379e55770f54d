use crate::sip::message::{Method, Response};
use crate::transaction::{
    key::TransactionKey, timer::TimerWheel, GatewayTimer, TIMER_B, TIMER_F,
};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::Instant,
};
use tracing::{debug, trace};

/// Client transaction record. Deliberately holds no callback: dispatch
/// looks the dialog up by call-id and drives a single response entry
/// point, so destroying a dialog invalidates its transactions for free.
#[derive(Debug)]
pub struct ClientTransaction {
    pub key: TransactionKey,
    pub method: Method,
    pub call_id: String,
    pub timer: Option<u64>,
    pub created_at: Instant,
}

/// Server-side INVITE memory: the last final-ish response sent for a key,
/// replayed verbatim when the peer retransmits the INVITE.
#[derive(Debug)]
pub struct ServerTransaction {
    pub key: TransactionKey,
    pub call_id: String,
    pub last_response: Option<Response>,
    pub created_at: Instant,
}

/// Both transaction maps plus the shared timer wheel. Mutated from the
/// UDP intake, timer loop and hub paths concurrently; each map guards
/// itself and every operation is a single locked step.
pub struct TransactionLayer {
    pub timers: TimerWheel<GatewayTimer>,
    clients: Mutex<HashMap<TransactionKey, ClientTransaction>>,
    servers: Mutex<HashMap<TransactionKey, ServerTransaction>>,
}

impl Default for TransactionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionLayer {
    pub fn new() -> Self {
        TransactionLayer {
            timers: TimerWheel::new(),
            clients: Mutex::new(HashMap::new()),
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an outbound request that expects a response, arming
    /// Timer B (INVITE) or Timer F (everything else).
    pub fn register_client(&self, key: TransactionKey, method: Method, call_id: String) {
        let timer = match method {
            Method::Invite => self
                .timers
                .schedule(TIMER_B, GatewayTimer::TimerB(key.clone())),
            _ => self
                .timers
                .schedule(TIMER_F, GatewayTimer::TimerF(key.clone())),
        };
        trace!("client transaction registered: {}", key);
        self.clients.lock().unwrap().insert(
            key.clone(),
            ClientTransaction {
                key,
                method,
                call_id,
                timer: Some(timer),
                created_at: Instant::now(),
            },
        );
    }

    /// Matches a response against the client store. Any response disarms
    /// the transaction timer; a final (>= 200) response also deletes the
    /// record. Returns the owning method and call so the engine can find
    /// the dialog; `None` means a stray response to drop.
    pub fn match_response(&self, key: &TransactionKey, status: u16) -> Option<(Method, String)> {
        let mut clients = self.clients.lock().unwrap();
        let record = clients.get_mut(key)?;
        if let Some(timer) = record.timer.take() {
            self.timers.cancel(timer);
        }
        let owner = (record.method.clone(), record.call_id.clone());
        if status >= 200 {
            clients.remove(key);
            trace!("client transaction finished: {}", key);
        }
        Some(owner)
    }

    /// Removes a client record whose Timer B/F fired.
    pub fn expire_client(&self, key: &TransactionKey) -> Option<(Method, String)> {
        self.clients
            .lock()
            .unwrap()
            .remove(key)
            .map(|record| (record.method, record.call_id))
    }

    /// Starts tracking an inbound INVITE so retransmissions can be
    /// answered by replay instead of creating a second dialog.
    pub fn register_server(&self, key: TransactionKey, call_id: String) {
        self.servers.lock().unwrap().insert(
            key.clone(),
            ServerTransaction {
                key,
                call_id,
                last_response: None,
                created_at: Instant::now(),
            },
        );
    }

    /// The remembered response for a key, if one was already sent.
    pub fn replay_for(&self, key: &TransactionKey) -> Option<Response> {
        self.servers
            .lock()
            .unwrap()
            .get(key)
            .and_then(|record| record.last_response.clone())
    }

    pub fn server_known(&self, key: &TransactionKey) -> bool {
        self.servers.lock().unwrap().contains_key(key)
    }

    /// Remembers a sent response for replay once it is 180 or better.
    pub fn record_response(&self, key: &TransactionKey, response: &Response) {
        if response.status < 180 {
            return;
        }
        if let Some(record) = self.servers.lock().unwrap().get_mut(key) {
            record.last_response = Some(response.clone());
        }
    }

    /// Drops a server record; the dialog is the authoritative long-lived
    /// record once the ACK has arrived.
    pub fn evict_server(&self, key: &TransactionKey) {
        self.servers.lock().unwrap().remove(key);
    }

    /// Invalidates every transaction belonging to a call. Part of the
    /// dialog cleanup path, which makes a late response a no-op.
    pub fn purge_call(&self, call_id: &str) {
        let mut clients = self.clients.lock().unwrap();
        let stale: Vec<TransactionKey> = clients
            .values()
            .filter(|record| record.call_id == call_id)
            .map(|record| record.key.clone())
            .collect();
        for key in stale {
            if let Some(record) = clients.remove(&key) {
                if let Some(timer) = record.timer {
                    self.timers.cancel(timer);
                }
                debug!("purged client transaction {}", key);
            }
        }
        drop(clients);
        let mut servers = self.servers.lock().unwrap();
        servers.retain(|_, record| record.call_id != call_id);
    }

    pub fn client_len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn server_len(&self) -> usize {
        self.servers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(branch: &str) -> TransactionKey {
        TransactionKey {
            branch: branch.to_string(),
            call_id: "call1@gw".to_string(),
            cseq: "1 INVITE".to_string(),
        }
    }

    #[test]
    fn test_provisional_keeps_invite_transaction_alive() {
        let layer = TransactionLayer::new();
        layer.register_client(key("b1"), Method::Invite, "call1@gw".into());
        assert_eq!(layer.timers.len(), 1);

        let matched = layer.match_response(&key("b1"), 180);
        assert_eq!(matched, Some((Method::Invite, "call1@gw".to_string())));
        assert_eq!(layer.client_len(), 1, "1xx must not delete the record");
        assert_eq!(layer.timers.len(), 0, "any response disarms the timer");

        let matched = layer.match_response(&key("b1"), 200);
        assert!(matched.is_some());
        assert_eq!(layer.client_len(), 0, "final response deletes the record");
    }

    #[test]
    fn test_stray_response_is_unmatched() {
        let layer = TransactionLayer::new();
        assert_eq!(layer.match_response(&key("nope"), 200), None);
    }

    #[test]
    fn test_server_replay_memory() {
        let layer = TransactionLayer::new();
        let k = key("b2");
        layer.register_server(k.clone(), "call1@gw".into());
        assert!(layer.server_known(&k));
        assert!(layer.replay_for(&k).is_none());

        let trying = Response {
            version: "SIP/2.0".into(),
            status: 100,
            reason: "Trying".into(),
            headers: Default::default(),
            body: String::new(),
        };
        layer.record_response(&k, &trying);
        assert!(layer.replay_for(&k).is_none(), "100 is never remembered");

        let ringing = Response {
            status: 180,
            reason: "Ringing".into(),
            ..trying
        };
        layer.record_response(&k, &ringing);
        assert_eq!(layer.replay_for(&k).map(|r| r.status), Some(180));

        layer.evict_server(&k);
        assert!(!layer.server_known(&k));
    }

    #[test]
    fn test_purge_call_drops_everything_for_the_call() {
        let layer = TransactionLayer::new();
        layer.register_client(key("b1"), Method::Invite, "call1@gw".into());
        let other = TransactionKey {
            branch: "b9".into(),
            call_id: "other@gw".into(),
            cseq: "1 INVITE".into(),
        };
        layer.register_client(other.clone(), Method::Invite, "other@gw".into());
        layer.register_server(key("b3"), "call1@gw".into());

        layer.purge_call("call1@gw");
        assert_eq!(layer.client_len(), 1);
        assert_eq!(layer.server_len(), 0);
        assert!(layer.match_response(&other, 200).is_some());
    }
}
