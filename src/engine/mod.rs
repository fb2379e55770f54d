pub mod dialog;
pub mod inbound;
pub mod outbound;

#[cfg(test)]
mod tests;

use crate::config::GatewayConfig;
use crate::event::{CallEvent, EventReceiver, EventSender};
use crate::metrics::GatewayMetrics;
use crate::relay::MediaRelayClient;
use crate::sip::builder::{gateway_via, make_request, reason_phrase};
use crate::sip::message::{uri_of, Method, Request, Response, SipMessage};
use crate::sip::{make_branch, make_call_id, make_tag};
use crate::transaction::{
    next_retransmit_interval, GatewayTimer, TransactionKey, TransactionLayer, OK_RETRANSMIT_CAP,
    TIMER_INTERVAL,
};
use crate::transport::{TransportEvent, UdpTransport};
use crate::{Error, Result};
use dialog::{Dialog, DialogDirection, DialogState, DialogStore};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct EngineInner {
    pub config: Arc<GatewayConfig>,
    pub transport: UdpTransport,
    pub relay: MediaRelayClient,
    pub dialogs: DialogStore,
    pub transactions: TransactionLayer,
    pub events: EventSender,
    pub metrics: Arc<GatewayMetrics>,
    pub running: AtomicBool,
    pub cancel_token: CancellationToken,
}

/// The signaling and session core: owns the dialog and transaction
/// stores, drives the SIP state machines, and talks to the media relay.
/// Everything user-visible leaves through the [`CallEvent`] channel.
#[derive(Clone)]
pub struct SignalingEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl SignalingEngine {
    pub async fn new(
        config: Arc<GatewayConfig>,
        metrics: Arc<GatewayMetrics>,
        cancel_token: CancellationToken,
    ) -> Result<(Self, EventReceiver)> {
        let transport = UdpTransport::bind(config.sip_bind_addr()).await?;
        let relay = MediaRelayClient::connect(&config.relay_addr(), metrics.clone()).await?;
        relay.start(cancel_token.child_token());
        Ok(Self::with_parts(
            config,
            transport,
            relay,
            metrics,
            cancel_token,
        ))
    }

    /// Assembles an engine around pre-built transport and relay handles;
    /// the test suites inject loopback counterparts through this.
    pub fn with_parts(
        config: Arc<GatewayConfig>,
        transport: UdpTransport,
        relay: MediaRelayClient,
        metrics: Arc<GatewayMetrics>,
        cancel_token: CancellationToken,
    ) -> (Self, EventReceiver) {
        let (events, event_rx) = unbounded_channel();
        let engine = SignalingEngine {
            inner: Arc::new(EngineInner {
                dialogs: DialogStore::new(config.max_sessions),
                transactions: TransactionLayer::new(),
                config,
                transport,
                relay,
                events,
                metrics,
                running: AtomicBool::new(true),
                cancel_token,
            }),
        };
        (engine, event_rx)
    }

    /// Spawns the receive, dispatch and timer tasks. Datagrams are
    /// dispatched sequentially so responses on one transaction key are
    /// observed in receive order.
    pub fn start(&self) {
        let (sender, mut receiver) = unbounded_channel();
        let transport = self.inner.transport.clone();
        let cancel_token = self.inner.cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.serve_loop(sender, cancel_token).await {
                warn!("SIP receive loop ended: {}", e);
            }
        });

        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(TransportEvent::Incoming(msg, src)) = receiver.recv().await {
                engine.dispatch(msg, src).await;
            }
        });

        let engine = self.clone();
        tokio::spawn(async move { engine.timer_loop().await });
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn active_calls(&self) -> usize {
        self.inner.dialogs.len()
    }

    pub(crate) fn emit(&self, event: CallEvent) {
        self.inner.events.send(event).ok();
    }

    pub(crate) async fn send_to(&self, msg: SipMessage, addr: SocketAddr) {
        if let Err(e) = self.inner.transport.send(&msg, addr).await {
            warn!("SIP send to {} failed: {}", addr, e);
        }
    }

    /// Sends a server response, remembering it for INVITE replay first.
    pub(crate) async fn respond(&self, key: &TransactionKey, response: Response, addr: SocketAddr) {
        self.inner.transactions.record_response(key, &response);
        self.send_to(response.into(), addr).await;
    }

    pub(crate) async fn dispatch(&self, msg: SipMessage, src: SocketAddr) {
        let outcome = match msg {
            SipMessage::Request(request) => self.handle_request(request, src).await,
            SipMessage::Response(response) => self.handle_response(response).await,
        };
        if let Err(e) = outcome {
            warn!("error handling datagram from {}: {}", src, e);
        }
    }

    async fn timer_loop(&self) {
        while !self.inner.cancel_token.is_cancelled() {
            for duty in self.inner.transactions.timers.due(Instant::now()) {
                self.on_timer(duty).await;
            }
            tokio::time::sleep(TIMER_INTERVAL).await;
        }
    }

    async fn on_timer(&self, duty: GatewayTimer) {
        match duty {
            GatewayTimer::TimerB(key) | GatewayTimer::TimerF(key) => {
                let Some((method, call_id)) = self.inner.transactions.expire_client(&key) else {
                    return;
                };
                GatewayMetrics::incr(&self.inner.metrics.transaction_timeouts);
                warn!("transaction timeout: {} ({})", key, method);
                if method == Method::Invite {
                    self.emit(CallEvent::Failed {
                        call_id: call_id.clone(),
                        reason: "request-timeout".to_string(),
                    });
                    self.cleanup(&call_id).await;
                }
            }
            GatewayTimer::TimerG {
                call_id,
                interval,
                attempt,
            } => {
                let Some(handle) = self.inner.dialogs.get(&call_id) else {
                    return;
                };
                let mut dlg = handle.lock().await;
                if dlg.state != DialogState::Answered || dlg.ack_received {
                    return;
                }
                if let (Some(ok), Some(addr)) = (dlg.last_ok.clone(), dlg.origin_addr) {
                    debug!("retransmitting 200 for {} (attempt {})", call_id, attempt);
                    self.send_to(ok.into(), addr).await;
                }
                dlg.retransmit_count = attempt;
                if attempt < OK_RETRANSMIT_CAP {
                    let next = next_retransmit_interval(interval);
                    dlg.retransmit_interval = next;
                    dlg.retransmit_timer =
                        Some(self.inner.transactions.timers.schedule(
                            next,
                            GatewayTimer::TimerG {
                                call_id: call_id.clone(),
                                interval: next,
                                attempt: attempt + 1,
                            },
                        ));
                } else {
                    dlg.retransmit_timer = None;
                }
            }
            GatewayTimer::TimerH { call_id } => {
                let Some(handle) = self.inner.dialogs.get(&call_id) else {
                    return;
                };
                {
                    let dlg = handle.lock().await;
                    if dlg.state != DialogState::Answered || dlg.ack_received {
                        return;
                    }
                }
                GatewayMetrics::incr(&self.inner.metrics.ack_timeouts);
                warn!("no ACK for {} before Timer H", call_id);
                self.emit(CallEvent::Failed {
                    call_id: call_id.clone(),
                    reason: "ack-timeout".to_string(),
                });
                self.cleanup(&call_id).await;
            }
        }
    }

    /// The single dialog teardown path. Idempotent: the first caller
    /// moves the dialog to `terminating` and racing callers bail out, so
    /// the media-relay delete happens exactly once per call.
    pub async fn cleanup(&self, call_id: &str) {
        let Some(handle) = self.inner.dialogs.get(call_id) else {
            return;
        };
        let relay_tag = {
            let mut dlg = handle.lock().await;
            if dlg.is_terminating() {
                return;
            }
            dlg.state = DialogState::Terminating;
            if let Some(id) = dlg.retransmit_timer.take() {
                self.inner.transactions.timers.cancel(id);
            }
            if let Some(id) = dlg.timer_h.take() {
                self.inner.transactions.timers.cancel(id);
            }
            dlg.relay_from_tag().to_string()
        };
        if let Err(e) = self.inner.relay.delete(call_id, &relay_tag).await {
            warn!("relay delete for {} failed: {}", call_id, e);
        }
        self.inner.transactions.purge_call(call_id);
        if let Some(handle) = self.inner.dialogs.remove(call_id) {
            handle.lock().await.state = DialogState::Terminated;
        }
        info!("dialog cleaned up: {}", call_id);
    }

    /// Gateway-initiated teardown. Established or answered dialogs get a
    /// fire-and-forget BYE; an outgoing dialog still awaiting its final
    /// response gets a CANCEL on the original branch (cleanup then rides
    /// on the 487); an unanswered incoming dialog is declined.
    pub async fn hangup(&self, call_id: &str) -> Result<()> {
        enum Teardown {
            Bye(Request, SocketAddr),
            Cancel(Request, SocketAddr),
            Decline,
            Done,
        }

        let Some(handle) = self.inner.dialogs.get(call_id) else {
            debug!("hangup for unknown call {}", call_id);
            return Ok(());
        };

        let action = {
            let mut dlg = handle.lock().await;
            if dlg.is_terminating() {
                Teardown::Done
            } else {
                match (dlg.direction, dlg.state) {
                    (_, DialogState::Answered) | (_, DialogState::Established) => {
                        dlg.cseq += 1;
                        let destination = match dlg.direction {
                            DialogDirection::Incoming => dlg.origin_addr.ok_or_else(|| {
                                Error::Dialog(
                                    "incoming dialog without origin address".to_string(),
                                    call_id.to_string(),
                                )
                            })?,
                            DialogDirection::Outgoing => self.upstream_addr().await?,
                        };
                        Teardown::Bye(self.compose_bye(&dlg)?, destination)
                    }
                    (DialogDirection::Outgoing, DialogState::Calling)
                    | (DialogDirection::Outgoing, DialogState::Ringing) => {
                        let destination = dlg.peer_addr.ok_or_else(|| {
                            Error::Dialog(
                                "outgoing dialog without peer address".to_string(),
                                call_id.to_string(),
                            )
                        })?;
                        Teardown::Cancel(self.compose_cancel(&dlg)?, destination)
                    }
                    (DialogDirection::Incoming, DialogState::Ringing) => Teardown::Decline,
                    _ => Teardown::Done,
                }
            }
        };

        match action {
            Teardown::Bye(bye, destination) => {
                self.send_to(bye.into(), destination).await;
                self.cleanup(call_id).await;
            }
            Teardown::Cancel(cancel, destination) => {
                // cleanup is deferred until the 487 lands on the INVITE
                self.send_to(cancel.into(), destination).await;
            }
            Teardown::Decline => self.reject(call_id, 603).await?,
            Teardown::Done => {}
        }
        Ok(())
    }

    /// BYE header composition follows dialog orientation: incoming legs
    /// echo the original To (plus our tag) as From and the original From
    /// as To; outgoing legs reuse the INVITE identities.
    fn compose_bye(&self, dlg: &Dialog) -> Result<Request> {
        let config = &self.inner.config;
        let via = gateway_via(
            &config.advertised_addr(),
            config.local_sip_port,
            &make_branch(),
        );
        match dlg.direction {
            DialogDirection::Incoming => {
                let origin = dlg.origin_request.as_ref().ok_or_else(|| {
                    Error::Dialog("missing origin request".to_string(), dlg.call_id.clone())
                })?;
                let orig_from = origin.headers.get("From").unwrap_or_default().to_string();
                let orig_to = origin.headers.get("To").unwrap_or_default().to_string();
                let from = format!("<{}>;tag={}", uri_of(&orig_to), dlg.local_tag);
                let uri = uri_of(&orig_from).to_string();
                Ok(make_request(
                    Method::Bye,
                    &uri,
                    &via,
                    &from,
                    &orig_from,
                    &dlg.call_id,
                    dlg.cseq,
                    None,
                ))
            }
            DialogDirection::Outgoing => {
                let from = dlg.local_from.clone().ok_or_else(|| {
                    Error::Dialog("missing local identity".to_string(), dlg.call_id.clone())
                })?;
                let target = dlg.target_uri.clone().ok_or_else(|| {
                    Error::Dialog("missing target URI".to_string(), dlg.call_id.clone())
                })?;
                let to = match &dlg.remote_tag {
                    Some(tag) => format!("<{}>;tag={}", target, tag),
                    None => format!("<{}>", target),
                };
                Ok(make_request(
                    Method::Bye,
                    &target,
                    &via,
                    &from,
                    &to,
                    &dlg.call_id,
                    dlg.cseq,
                    None,
                ))
            }
        }
    }

    /// CANCEL reuses the INVITE's branch and sequence number so the peer
    /// can correlate it with the pending transaction.
    fn compose_cancel(&self, dlg: &Dialog) -> Result<Request> {
        let config = &self.inner.config;
        let branch = dlg.invite_branch.clone().ok_or_else(|| {
            Error::Dialog("missing INVITE branch".to_string(), dlg.call_id.clone())
        })?;
        let from = dlg.local_from.clone().ok_or_else(|| {
            Error::Dialog("missing local identity".to_string(), dlg.call_id.clone())
        })?;
        let target = dlg.target_uri.clone().ok_or_else(|| {
            Error::Dialog("missing target URI".to_string(), dlg.call_id.clone())
        })?;
        let via = gateway_via(&config.advertised_addr(), config.local_sip_port, &branch);
        Ok(make_request(
            Method::Cancel,
            &target,
            &via,
            &from,
            &format!("<{}>", target),
            &dlg.call_id,
            dlg.invite_cseq,
            None,
        ))
    }

    pub(crate) async fn upstream_addr(&self) -> Result<SocketAddr> {
        let upstream = self.inner.config.upstream_addr();
        let resolved = tokio::net::lookup_host(&upstream)
            .await
            .map_err(|e| Error::Transport(format!("resolve {}: {}", upstream, e)))?
            .next()
            .ok_or_else(|| Error::Transport(format!("no address for {}", upstream)));
        resolved
    }

    /// Dial targets with an IP-literal host go straight to that host;
    /// everything else is routed through the upstream telephony server.
    pub(crate) async fn resolve_target(&self, uri: &str) -> Result<SocketAddr> {
        let (host, port) = crate::sip::message::uri_host_port(uri);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port.unwrap_or(5060)));
        }
        self.upstream_addr().await
    }

    /// Graceful shutdown: hang up every dialog, then stop the relay
    /// client and cancel the I/O loops.
    pub async fn shutdown(&self) {
        info!("engine shutting down, {} active calls", self.active_calls());
        self.inner.running.store(false, Ordering::SeqCst);
        for call_id in self.inner.dialogs.call_ids() {
            if let Err(e) = self.hangup(&call_id).await {
                warn!("shutdown hangup for {} failed: {}", call_id, e);
            }
            // a CANCELed leg never sees its 487 once the loops stop
            self.cleanup(&call_id).await;
        }
        self.inner.relay.shutdown();
        self.inner.cancel_token.cancel();
    }

    /// Startup probe of the media daemon; a failure here is fatal for
    /// the binary when the SIP gateway is enabled.
    pub async fn ping_relay(&self) -> Result<()> {
        self.inner.relay.ping().await
    }

    pub(crate) fn new_call_id(&self) -> String {
        make_call_id(&self.inner.config.advertised_addr())
    }

    pub(crate) fn new_tag(&self) -> String {
        make_tag()
    }

    pub(crate) fn failure_reason(status: u16, reason: &str) -> String {
        if reason.is_empty() {
            reason_phrase(status).to_string()
        } else {
            reason.to_string()
        }
    }
}
