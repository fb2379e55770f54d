pub mod protocol;

use crate::config::GatewayConfig;
use crate::engine::SignalingEngine;
use crate::event::{CallEvent, EventReceiver};
use crate::Error;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use protocol::{is_valid_username, ClientFrame, ServerFrame, MAX_FRAME_BYTES};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_STRIKES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    Telephony,
    Browser,
}

/// What the hub remembers about an engine-managed call: who owns it on
/// the browser side and who the far end is. Used for event routing and
/// for tearing telephony legs down when their owner disconnects.
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub owner: String,
    pub origin: CallOrigin,
    pub counterpart: String,
}

#[derive(Clone)]
struct Peer {
    sender: UnboundedSender<Message>,
}

struct HubInner {
    engine: Option<SignalingEngine>,
    peers: Mutex<HashMap<String, Peer>>,
    calls: Mutex<HashMap<String, ActiveCall>>,
    #[allow(dead_code)]
    config: Arc<GatewayConfig>,
}

/// Registry of named browser peers plus the bridge between their JSON
/// frames and the signaling engine. Browser↔browser primitives are
/// forwarded verbatim (with `from` injected); telephony-bound ones are
/// translated into engine calls.
#[derive(Clone)]
pub struct BrowserHub {
    inner: Arc<HubInner>,
}

impl BrowserHub {
    pub fn new(engine: Option<SignalingEngine>, config: Arc<GatewayConfig>) -> Self {
        BrowserHub {
            inner: Arc::new(HubInner {
                engine,
                peers: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().unwrap().len()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    /// Consumes engine events and forwards them to the owning peer.
    pub fn run_events(&self, mut events: EventReceiver) {
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                hub.on_engine_event(event).await;
            }
        });
    }

    async fn on_engine_event(&self, event: CallEvent) {
        match event {
            CallEvent::Incoming {
                call_id,
                from,
                to,
                sdp,
            } => {
                let reachable = self.send_frame(
                    &to,
                    ServerFrame::IncomingCall {
                        from: from.clone(),
                        call_id: call_id.clone(),
                        sdp,
                    },
                );
                if reachable {
                    self.inner.calls.lock().unwrap().insert(
                        call_id,
                        ActiveCall {
                            owner: to,
                            origin: CallOrigin::Telephony,
                            counterpart: from,
                        },
                    );
                } else if let Some(engine) = &self.inner.engine {
                    info!("callee {} unreachable, rejecting {}", to, call_id);
                    engine.reject(&call_id, 480).await.ok();
                }
            }
            CallEvent::Ringing { call_id } => {
                self.forward_to_owner(&call_id, ServerFrame::CallRinging { call_id: call_id.clone() });
            }
            CallEvent::Answered { call_id, sdp } => {
                self.forward_to_owner(
                    &call_id,
                    ServerFrame::CallAnswered {
                        call_id: call_id.clone(),
                        sdp,
                    },
                );
            }
            CallEvent::Failed { call_id, reason } => {
                self.forward_to_owner(
                    &call_id,
                    ServerFrame::CallFailed {
                        call_id: call_id.clone(),
                        reason,
                    },
                );
                self.inner.calls.lock().unwrap().remove(&call_id);
            }
            CallEvent::Ended { call_id, reason } => {
                self.forward_to_owner(
                    &call_id,
                    ServerFrame::CallEnded {
                        call_id: call_id.clone(),
                        reason,
                    },
                );
                self.inner.calls.lock().unwrap().remove(&call_id);
            }
            CallEvent::Dtmf {
                call_id,
                digit,
                duration,
            } => {
                self.forward_to_owner(
                    &call_id,
                    ServerFrame::Dtmf {
                        call_id: call_id.clone(),
                        digit: digit.to_string(),
                        duration,
                    },
                );
            }
            CallEvent::Renegotiation { call_id, sdp } => {
                self.forward_to_owner(
                    &call_id,
                    ServerFrame::MediaRenegotiation {
                        call_id: call_id.clone(),
                        sdp,
                    },
                );
            }
        }
    }

    fn forward_to_owner(&self, call_id: &str, frame: ServerFrame) {
        let owner = self
            .inner
            .calls
            .lock()
            .unwrap()
            .get(call_id)
            .map(|call| call.owner.clone());
        match owner {
            Some(owner) => {
                self.send_frame(&owner, frame);
            }
            None => debug!("event for untracked call {} dropped", call_id),
        }
    }

    fn send_frame(&self, username: &str, frame: ServerFrame) -> bool {
        let peer = self.inner.peers.lock().unwrap().get(username).cloned();
        match peer {
            Some(peer) => peer
                .sender
                .send(Message::Text(frame.to_json().into()))
                .is_ok(),
            None => false,
        }
    }

    fn send_raw(&self, username: &str, value: &Value) -> bool {
        let peer = self.inner.peers.lock().unwrap().get(username).cloned();
        match peer {
            Some(peer) => peer
                .sender
                .send(Message::Text(value.to_string().into()))
                .is_ok(),
            None => false,
        }
    }

    fn broadcast_except(&self, skip: &str, frame: ServerFrame) {
        let peers: Vec<(String, Peer)> = self
            .inner
            .peers
            .lock()
            .unwrap()
            .iter()
            .map(|(name, peer)| (name.clone(), peer.clone()))
            .collect();
        let text = frame.to_json();
        for (name, peer) in peers {
            if name != skip {
                peer.sender.send(Message::Text(text.clone().into())).ok();
            }
        }
    }

    /// Drives one browser connection to completion: registration,
    /// frame routing, 30 s heartbeats with two-strike termination, and
    /// teardown of owned telephony legs on disconnect.
    pub async fn handle_socket(self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (sender, mut outbound) = unbounded_channel::<Message>();
        let mut username: Option<String> = None;
        let mut strikes: u8 = 0;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // the first tick is immediate

        sender
            .send(Message::Text(ServerFrame::Connected.to_json().into()))
            .ok();

        loop {
            tokio::select! {
                outgoing = outbound.recv() => {
                    let Some(msg) = outgoing else { break };
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.on_text(&mut username, text.as_str(), &sender).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            strikes = 0;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            sender.send(Message::Pong(payload)).ok();
                        }
                        Some(Ok(Message::Binary(_))) => {
                            sender
                                .send(Message::Text(
                                    ServerFrame::error("Binary frames not supported")
                                        .to_json()
                                        .into(),
                                ))
                                .ok();
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!("websocket error: {}", e);
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    strikes += 1;
                    if strikes > HEARTBEAT_STRIKES {
                        info!("peer {:?} failed heartbeat, closing", username);
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(name) = username {
            self.disconnect(&name).await;
        }
    }

    async fn on_text(
        &self,
        username: &mut Option<String>,
        text: &str,
        sender: &UnboundedSender<Message>,
    ) {
        let reply = |frame: ServerFrame| {
            sender.send(Message::Text(frame.to_json().into())).ok();
        };

        if text.len() > MAX_FRAME_BYTES {
            reply(ServerFrame::error("Message too large"));
            return;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                reply(ServerFrame::error("Invalid JSON"));
                return;
            }
        };
        let frame: ClientFrame = match serde_json::from_value(value.clone()) {
            Ok(frame) => frame,
            Err(_) => {
                reply(ServerFrame::error("Unknown message"));
                return;
            }
        };

        let frame = match frame {
            ClientFrame::Register { username: wanted } => {
                if username.is_some() {
                    reply(ServerFrame::error("Already registered"));
                    return;
                }
                if !is_valid_username(&wanted) {
                    reply(ServerFrame::error("Invalid username"));
                    return;
                }
                {
                    let mut peers = self.inner.peers.lock().unwrap();
                    if peers.contains_key(&wanted) {
                        drop(peers);
                        reply(ServerFrame::error("Username taken"));
                        return;
                    }
                    peers.insert(
                        wanted.clone(),
                        Peer {
                            sender: sender.clone(),
                        },
                    );
                }
                let users: Vec<String> = self
                    .inner
                    .peers
                    .lock()
                    .unwrap()
                    .keys()
                    .filter(|name| **name != wanted)
                    .cloned()
                    .collect();
                reply(ServerFrame::Registered {
                    username: wanted.clone(),
                });
                reply(ServerFrame::UserList { users });
                self.broadcast_except(
                    &wanted,
                    ServerFrame::UserJoined {
                        username: wanted.clone(),
                    },
                );
                info!("peer registered: {}", wanted);
                *username = Some(wanted);
                return;
            }
            other => other,
        };

        let Some(me) = username.clone() else {
            reply(ServerFrame::error("Not registered"));
            return;
        };

        match frame {
            ClientFrame::Register { .. } => unreachable!("handled above"),
            ClientFrame::CallRequest { to, sdp, data } => {
                if to.starts_with("sip:") {
                    let carrier = sdp.or(data).unwrap_or(Value::Null);
                    let Some(offer) = crate::sdp::flatten(&carrier) else {
                        reply(ServerFrame::error("call-request without SDP"));
                        return;
                    };
                    let Some(engine) = &self.inner.engine else {
                        reply(ServerFrame::error("SIP gateway disabled"));
                        return;
                    };
                    match engine.place(&me, &to, &offer).await {
                        Ok(call_id) => {
                            self.inner.calls.lock().unwrap().insert(
                                call_id,
                                ActiveCall {
                                    owner: me,
                                    origin: CallOrigin::Browser,
                                    counterpart: to,
                                },
                            );
                        }
                        Err(Error::Capacity(_)) => {
                            reply(ServerFrame::error("Too many concurrent calls"));
                        }
                        Err(e) => {
                            warn!("placing call for {} failed: {}", me, e);
                            reply(ServerFrame::error("Call setup failed"));
                        }
                    }
                } else {
                    self.forward(&me, &to, &value, sender);
                }
            }
            ClientFrame::CallResponse {
                to,
                accepted,
                call_id,
            } => {
                if let Some(to) = to {
                    self.forward(&me, &to, &value, sender);
                } else if !accepted {
                    let call_id = call_id.or_else(|| self.incoming_call_of(&me));
                    if let (Some(call_id), Some(engine)) = (call_id, &self.inner.engine) {
                        if self.owns(&me, &call_id) {
                            engine.reject(&call_id, 603).await.ok();
                            self.inner.calls.lock().unwrap().remove(&call_id);
                        }
                    }
                }
            }
            ClientFrame::Offer { to, .. } | ClientFrame::IceCandidate { to, .. } => {
                self.forward(&me, &to, &value, sender);
            }
            ClientFrame::Answer { to, data } => {
                match to {
                    Some(to) => self.forward(&me, &to, &value, sender),
                    None => {
                        // the callee of an incoming telephony call answered
                        let Some(sdp) = crate::sdp::flatten(&data) else {
                            reply(ServerFrame::error("answer without SDP"));
                            return;
                        };
                        let Some(call_id) = self.incoming_call_of(&me) else {
                            reply(ServerFrame::error("No call to answer"));
                            return;
                        };
                        if let Some(engine) = &self.inner.engine {
                            if let Err(e) = engine.answer(&call_id, &sdp).await {
                                warn!("answer for {} failed: {}", call_id, e);
                                reply(ServerFrame::error("Answer failed"));
                                // a wrong-state answer leaves the call alone;
                                // anything else means the engine tore it down
                                if !matches!(e, Error::Protocol(_)) {
                                    self.inner.calls.lock().unwrap().remove(&call_id);
                                }
                            }
                        }
                    }
                }
            }
            ClientFrame::Hangup { to, call_id } => {
                if let Some(call_id) = call_id {
                    if self.owns(&me, &call_id) {
                        if let Some(engine) = &self.inner.engine {
                            engine.hangup(&call_id).await.ok();
                        }
                        self.inner.calls.lock().unwrap().remove(&call_id);
                    }
                } else if let Some(to) = to {
                    let forwarded = serde_json::json!({"type": "hang-up", "from": me});
                    self.send_raw(&to, &forwarded);
                }
            }
            ClientFrame::Reject { to, call_id } => {
                if let Some(call_id) = call_id {
                    if self.owns(&me, &call_id) {
                        if let Some(engine) = &self.inner.engine {
                            engine.reject(&call_id, 603).await.ok();
                        }
                        self.inner.calls.lock().unwrap().remove(&call_id);
                    }
                } else if let Some(to) = to {
                    self.send_frame(&to, ServerFrame::CallRejected { from: me });
                }
            }
        }
    }

    /// Verbatim forwarding of browser↔browser primitives with `from`
    /// injected, so the receiving peer knows who is talking.
    fn forward(
        &self,
        from: &str,
        to: &str,
        value: &Value,
        sender: &UnboundedSender<Message>,
    ) {
        let mut forwarded = value.clone();
        if let Some(map) = forwarded.as_object_mut() {
            map.insert("from".to_string(), Value::String(from.to_string()));
            map.remove("to");
        }
        if !self.send_raw(to, &forwarded) {
            sender
                .send(Message::Text(
                    ServerFrame::error("User not available").to_json().into(),
                ))
                .ok();
        }
    }

    fn owns(&self, username: &str, call_id: &str) -> bool {
        self.inner
            .calls
            .lock()
            .unwrap()
            .get(call_id)
            .map(|call| call.owner == username)
            .unwrap_or(false)
    }

    /// The (single) unanswered telephony-origin call owned by a peer.
    fn incoming_call_of(&self, username: &str) -> Option<String> {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .find(|(_, call)| call.owner == username && call.origin == CallOrigin::Telephony)
            .map(|(call_id, _)| call_id.clone())
    }

    async fn disconnect(&self, username: &str) {
        self.inner.peers.lock().unwrap().remove(username);
        self.broadcast_except(
            username,
            ServerFrame::UserLeft {
                username: username.to_string(),
            },
        );

        let owned: Vec<String> = self
            .inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, call)| call.owner == username)
            .map(|(call_id, _)| call_id.clone())
            .collect();
        if let Some(engine) = &self.inner.engine {
            for call_id in &owned {
                info!("tearing down {} after {} disconnected", call_id, username);
                engine.hangup(call_id).await.ok();
            }
        }
        {
            let mut calls = self.inner.calls.lock().unwrap();
            for call_id in &owned {
                calls.remove(call_id);
            }
        }
        info!("peer disconnected: {}", username);
    }
}
