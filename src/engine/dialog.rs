use crate::sip::message::Request;
use crate::transaction::{TransactionKey, T1};
use crate::{Error, Result};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Calling,
    Ringing,
    Answered,
    Established,
    Terminating,
    Terminated,
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DialogState::Calling => "calling",
            DialogState::Ringing => "ringing",
            DialogState::Answered => "answered",
            DialogState::Established => "established",
            DialogState::Terminating => "terminating",
            DialogState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// One call leg toward the telephony side, keyed by Call-ID. All mutable
/// state is serialized behind the store's per-dialog mutex.
#[derive(Debug)]
pub struct Dialog {
    pub call_id: String,
    pub direction: DialogDirection,
    /// Browser-side username this leg belongs to.
    pub peer: String,
    pub local_tag: String,
    pub remote_tag: Option<String>,
    /// Sequence number for requests this side originates; incremented
    /// before each new request.
    pub cseq: u32,
    pub state: DialogState,

    // outgoing legs
    pub target_uri: Option<String>,
    pub local_from: Option<String>,
    pub invite_branch: Option<String>,
    pub invite_cseq: u32,
    pub peer_addr: Option<SocketAddr>,
    pub last_ack: Option<Request>,

    // incoming legs
    pub origin_request: Option<Request>,
    /// Where the initial INVITE actually came from; authoritative for
    /// BYE/CANCEL because NAT rewriting may have masked the From URI.
    pub origin_addr: Option<SocketAddr>,
    pub server_tx_key: Option<TransactionKey>,

    // 2xx reliability (only while state is `answered`)
    pub last_ok: Option<crate::sip::message::Response>,
    pub retransmit_timer: Option<u64>,
    pub retransmit_count: u32,
    pub retransmit_interval: Duration,
    pub timer_h: Option<u64>,
    pub ack_received: bool,

    pub created_at: Instant,
}

impl Dialog {
    pub fn outgoing(
        call_id: String,
        peer: String,
        local_tag: String,
        target_uri: String,
        local_from: String,
        invite_branch: String,
        peer_addr: SocketAddr,
    ) -> Self {
        Dialog {
            call_id,
            direction: DialogDirection::Outgoing,
            peer,
            local_tag,
            remote_tag: None,
            cseq: 1,
            state: DialogState::Calling,
            target_uri: Some(target_uri),
            local_from: Some(local_from),
            invite_branch: Some(invite_branch),
            invite_cseq: 1,
            peer_addr: Some(peer_addr),
            last_ack: None,
            origin_request: None,
            origin_addr: None,
            server_tx_key: None,
            last_ok: None,
            retransmit_timer: None,
            retransmit_count: 0,
            retransmit_interval: T1,
            timer_h: None,
            ack_received: false,
            created_at: Instant::now(),
        }
    }

    pub fn incoming(
        call_id: String,
        peer: String,
        local_tag: String,
        remote_tag: String,
        origin_request: Request,
        origin_addr: SocketAddr,
        server_tx_key: TransactionKey,
    ) -> Self {
        Dialog {
            call_id,
            direction: DialogDirection::Incoming,
            peer,
            local_tag,
            remote_tag: Some(remote_tag),
            cseq: 1,
            state: DialogState::Ringing,
            target_uri: None,
            local_from: None,
            invite_branch: None,
            invite_cseq: 0,
            peer_addr: None,
            last_ack: None,
            origin_request: Some(origin_request),
            origin_addr: Some(origin_addr),
            server_tx_key: Some(server_tx_key),
            last_ok: None,
            retransmit_timer: None,
            retransmit_count: 0,
            retransmit_interval: T1,
            timer_h: None,
            ack_received: false,
            created_at: Instant::now(),
        }
    }

    pub fn is_terminating(&self) -> bool {
        matches!(
            self.state,
            DialogState::Terminating | DialogState::Terminated
        )
    }

    /// The caller-side tag the media relay sessions are keyed on: ours
    /// for outgoing legs, the peer's for incoming ones.
    pub fn relay_from_tag(&self) -> &str {
        match self.direction {
            DialogDirection::Outgoing => &self.local_tag,
            DialogDirection::Incoming => self.remote_tag.as_deref().unwrap_or(&self.local_tag),
        }
    }
}

pub type DialogHandle = Arc<Mutex<Dialog>>;

/// Concurrent Call-ID → dialog map with the `max_sessions` cap. The map
/// lock is only ever held for lookup/insert/remove; dialog state lives
/// behind each entry's own mutex.
pub struct DialogStore {
    dialogs: RwLock<HashMap<String, DialogHandle>>,
    max_sessions: usize,
}

impl DialogStore {
    pub fn new(max_sessions: usize) -> Self {
        DialogStore {
            dialogs: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn insert(&self, dialog: Dialog) -> Result<DialogHandle> {
        let mut dialogs = self.dialogs.write().unwrap();
        if dialogs.len() >= self.max_sessions {
            return Err(Error::Capacity(dialogs.len()));
        }
        if dialogs.contains_key(&dialog.call_id) {
            return Err(Error::Dialog(
                "dialog already exists".to_string(),
                dialog.call_id,
            ));
        }
        let call_id = dialog.call_id.clone();
        let handle = Arc::new(Mutex::new(dialog));
        dialogs.insert(call_id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, call_id: &str) -> Option<DialogHandle> {
        self.dialogs.read().unwrap().get(call_id).cloned()
    }

    pub fn remove(&self, call_id: &str) -> Option<DialogHandle> {
        let removed = self.dialogs.write().unwrap().remove(call_id);
        if removed.is_some() {
            debug!("dialog removed: {}", call_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.dialogs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_sessions
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.dialogs.read().unwrap().keys().cloned().collect()
    }
}
