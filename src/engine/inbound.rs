use crate::engine::dialog::{Dialog, DialogDirection, DialogState};
use crate::engine::SignalingEngine;
use crate::event::CallEvent;
use crate::metrics::GatewayMetrics;
use crate::relay::RelayProfile;
use crate::sip::builder::{apply_gateway_headers, augment_to_tag, make_response};
use crate::sip::message::{uri_of, uri_user, Method, Request};
use crate::sip::nat::rewrite_top_via;
use crate::transaction::{GatewayTimer, TransactionKey, T1, TIMER_H};
use crate::{Error, Result};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

pub(crate) const DTMF_CONTENT_TYPE: &str = "application/dtmf-relay";
const DEFAULT_DTMF_DURATION: u32 = 160;

/// `Signal=`/`Duration=` body of an out-of-band DTMF INFO. Duration
/// defaults to 160 ms when absent.
pub(crate) fn parse_dtmf(body: &str) -> Option<(char, u32)> {
    let mut digit = None;
    let mut duration = DEFAULT_DTMF_DURATION;
    for line in body.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Signal=") {
            let value = value.trim().to_ascii_uppercase();
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_digit() || matches!(c, 'A'..='D' | '*' | '#') => {
                    digit = Some(c);
                }
                _ => return None,
            }
        } else if let Some(value) = line.strip_prefix("Duration=") {
            duration = value.trim().parse().unwrap_or(DEFAULT_DTMF_DURATION);
        }
    }
    digit.map(|d| (d, duration))
}

impl SignalingEngine {
    pub(crate) async fn handle_request(&self, mut request: Request, source: SocketAddr) -> Result<()> {
        rewrite_top_via(&mut request, source);
        match request.method {
            Method::Invite => self.on_invite(request, source).await,
            Method::Ack => self.on_ack(request).await,
            Method::Bye => self.on_bye(request, source).await,
            Method::Cancel => self.on_cancel(request, source).await,
            Method::Info => self.on_info(request, source).await,
            Method::Options => self.on_options(request, source).await,
            Method::Other(ref name) => {
                debug!("unsupported method {} answered 501", name);
                let resp = make_response(&request, 501, None);
                self.send_to(resp.into(), source).await;
                Ok(())
            }
        }
    }

    async fn on_invite(&self, request: Request, source: SocketAddr) -> Result<()> {
        let key = TransactionKey::try_from(&request)?;

        // retransmission: replay whatever was last sent for this key
        if let Some(replay) = self.inner.transactions.replay_for(&key) {
            GatewayMetrics::incr(&self.inner.metrics.retried_invites);
            debug!("replaying {} for retransmitted INVITE {}", replay.status, key);
            self.send_to(replay.into(), source).await;
            return Ok(());
        }
        if self.inner.transactions.server_known(&key) {
            // still processing the first copy
            return Ok(());
        }

        let call_id = request
            .call_id()
            .ok_or_else(|| Error::Protocol("INVITE without Call-ID".to_string()))?
            .to_string();

        if let Some(handle) = self.inner.dialogs.get(&call_id) {
            return self.on_reinvite(handle, request, source, key).await;
        }

        GatewayMetrics::incr(&self.inner.metrics.calls_received);

        if !self.is_running() || self.inner.dialogs.is_full() {
            warn!("INVITE {} refused: at capacity", call_id);
            self.send_to(make_response(&request, 503, None).into(), source)
                .await;
            return Ok(());
        }

        let Some(from_tag) = request.from_tag().map(str::to_string) else {
            self.send_to(make_response(&request, 500, None).into(), source)
                .await;
            return Ok(());
        };
        if crate::sdp::validate(&request.body).is_err() {
            debug!("INVITE {} body failed validation", call_id);
            self.send_to(make_response(&request, 500, None).into(), source)
                .await;
            return Ok(());
        }

        self.inner
            .transactions
            .register_server(key.clone(), call_id.clone());
        self.respond(&key, make_response(&request, 100, None), source)
            .await;

        let translated = match self
            .inner
            .relay
            .offer(
                &call_id,
                &from_tag,
                None,
                &request.body,
                RelayProfile::inbound_offer(),
            )
            .await
            .and_then(|sdp| crate::sdp::validate(&sdp).map(|_| sdp))
        {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!("relay offer for {} failed: {}", call_id, e);
                self.respond(&key, make_response(&request, 500, None), source)
                    .await;
                return Ok(());
            }
        };

        let local_tag = self.new_tag();
        let config = &self.inner.config;
        let mut ringing = make_response(&request, 180, None);
        augment_to_tag(&mut ringing, &local_tag);
        apply_gateway_headers(&mut ringing, &config.advertised_addr(), config.local_sip_port);
        self.respond(&key, ringing, source).await;

        let from = uri_of(request.headers.get("From").unwrap_or_default()).to_string();
        let to_user = uri_user(&request.uri)
            .or_else(|| request.headers.get("To").map(uri_of).and_then(uri_user))
            .unwrap_or_default()
            .to_string();

        let dialog = Dialog::incoming(
            call_id.clone(),
            to_user.clone(),
            local_tag,
            from_tag.clone(),
            request,
            source,
            key.clone(),
        );
        if let Err(e) = self.inner.dialogs.insert(dialog) {
            // lost a capacity race after the early check; the relay
            // already holds an offer session for this leg
            warn!("could not create dialog {}: {}", call_id, e);
            self.inner.transactions.evict_server(&key);
            if let Err(e) = self.inner.relay.delete(&call_id, &from_tag).await {
                warn!("relay delete for {} failed: {}", call_id, e);
            }
            return Ok(());
        }

        info!("incoming call {} from {} for {}", call_id, from, to_user);
        self.emit(CallEvent::Incoming {
            call_id,
            from,
            to: to_user,
            sdp: translated,
        });
        Ok(())
    }

    /// The browser answered an incoming call. Translates the answer for
    /// the telephony leg, sends the reliable 200, and arms the
    /// retransmit and ACK-wait timers.
    pub async fn answer(&self, call_id: &str, sdp: &str) -> Result<()> {
        let handle = self
            .inner
            .dialogs
            .get(call_id)
            .ok_or_else(|| Error::NotFound(call_id.to_string()))?;
        let mut dlg = handle.lock().await;
        if dlg.direction != DialogDirection::Incoming || dlg.state != DialogState::Ringing {
            return Err(Error::Protocol(format!(
                "answer in state {} refused",
                dlg.state
            )));
        }

        // telephony peers are audio-only: a stray video section in the
        // browser answer confuses downstream devices
        let stripped = crate::sdp::strip_video(sdp);
        let prepared = crate::sdp::validate(&stripped).map(|_| stripped);

        let key = dlg.server_tx_key.clone().ok_or_else(|| {
            Error::Dialog("missing server transaction".to_string(), call_id.to_string())
        })?;
        let origin_addr = dlg.origin_addr.ok_or_else(|| {
            Error::Dialog("missing origin address".to_string(), call_id.to_string())
        })?;
        let remote_tag = dlg.remote_tag.clone().unwrap_or_default();
        let local_tag = dlg.local_tag.clone();

        let translated = match prepared {
            Ok(sdp) => {
                self.inner
                    .relay
                    .answer(
                        call_id,
                        &remote_tag,
                        &local_tag,
                        &sdp,
                        RelayProfile::inbound_answer(),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        let translated = match translated {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!("answering {} failed: {}", call_id, e);
                let origin = dlg.origin_request.clone();
                drop(dlg);
                if let Some(origin) = origin {
                    self.respond(&key, make_response(&origin, 500, None), origin_addr)
                        .await;
                }
                self.cleanup(call_id).await;
                return Err(e);
            }
        };

        let origin = dlg.origin_request.clone().ok_or_else(|| {
            Error::Dialog("missing origin request".to_string(), call_id.to_string())
        })?;
        let config = &self.inner.config;
        let mut ok = make_response(&origin, 200, Some(translated));
        augment_to_tag(&mut ok, &local_tag);
        apply_gateway_headers(&mut ok, &config.advertised_addr(), config.local_sip_port);
        ok.headers.set("Content-Type", "application/sdp");
        self.respond(&key, ok.clone(), origin_addr).await;

        dlg.last_ok = Some(ok);
        dlg.state = DialogState::Answered;
        dlg.retransmit_count = 0;
        dlg.retransmit_interval = T1;
        dlg.retransmit_timer = Some(self.inner.transactions.timers.schedule(
            T1,
            GatewayTimer::TimerG {
                call_id: call_id.to_string(),
                interval: T1,
                attempt: 1,
            },
        ));
        dlg.timer_h = Some(self.inner.transactions.timers.schedule(
            TIMER_H,
            GatewayTimer::TimerH {
                call_id: call_id.to_string(),
            },
        ));
        info!("call {} answered", call_id);
        Ok(())
    }

    /// Declines an unanswered incoming call (603 from the callee, 480
    /// when the callee is unreachable).
    pub async fn reject(&self, call_id: &str, status: u16) -> Result<()> {
        let Some(handle) = self.inner.dialogs.get(call_id) else {
            debug!("reject for unknown call {}", call_id);
            return Ok(());
        };
        {
            let dlg = handle.lock().await;
            if dlg.direction != DialogDirection::Incoming || dlg.is_terminating() {
                return Ok(());
            }
            if let (Some(origin), Some(addr), Some(key)) = (
                dlg.origin_request.clone(),
                dlg.origin_addr,
                dlg.server_tx_key.clone(),
            ) {
                let mut resp = make_response(&origin, status, None);
                augment_to_tag(&mut resp, &dlg.local_tag);
                drop(dlg);
                self.respond(&key, resp, addr).await;
            }
        }
        info!("call {} rejected with {}", call_id, status);
        self.cleanup(call_id).await;
        Ok(())
    }

    /// Mid-dialog renegotiation (hold, codec change). Only an
    /// established dialog may renegotiate; the relay is addressed with
    /// the existing tags and asked to generate mids.
    async fn on_reinvite(
        &self,
        handle: crate::engine::dialog::DialogHandle,
        request: Request,
        source: SocketAddr,
        key: TransactionKey,
    ) -> Result<()> {
        let mut dlg = handle.lock().await;
        if dlg.state != DialogState::Established {
            debug!(
                "re-INVITE for {} in state {} refused",
                dlg.call_id, dlg.state
            );
            self.send_to(make_response(&request, 500, None).into(), source)
                .await;
            return Ok(());
        }
        if crate::sdp::validate(&request.body).is_err() {
            self.send_to(make_response(&request, 500, None).into(), source)
                .await;
            return Ok(());
        }

        GatewayMetrics::incr(&self.inner.metrics.re_invites);
        let call_id = dlg.call_id.clone();
        self.inner
            .transactions
            .register_server(key.clone(), call_id.clone());

        let incoming = dlg.direction == DialogDirection::Incoming;
        let (from_tag, to_tag) = match dlg.direction {
            DialogDirection::Incoming => (
                dlg.remote_tag.clone().unwrap_or_default(),
                dlg.local_tag.clone(),
            ),
            DialogDirection::Outgoing => (
                dlg.local_tag.clone(),
                dlg.remote_tag.clone().unwrap_or_default(),
            ),
        };

        let translated = match self
            .inner
            .relay
            .offer(
                &call_id,
                &from_tag,
                Some(&to_tag),
                &request.body,
                RelayProfile::reinvite(incoming),
            )
            .await
        {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!("renegotiation for {} failed: {}", call_id, e);
                let resp = make_response(&request, 500, None);
                drop(dlg);
                self.respond(&key, resp, source).await;
                return Ok(());
            }
        };

        let config = &self.inner.config;
        let mut ok = make_response(&request, 200, Some(translated.clone()));
        augment_to_tag(&mut ok, &dlg.local_tag);
        apply_gateway_headers(&mut ok, &config.advertised_addr(), config.local_sip_port);
        ok.headers.set("Content-Type", "application/sdp");
        drop(dlg);
        self.respond(&key, ok, source).await;

        info!("renegotiated media for {}", call_id);
        self.emit(CallEvent::Renegotiation {
            call_id,
            sdp: translated,
        });
        Ok(())
    }

    async fn on_ack(&self, request: Request) -> Result<()> {
        let Some(call_id) = request.call_id() else {
            return Ok(());
        };
        let Some(handle) = self.inner.dialogs.get(call_id) else {
            warn!("ACK without a session: {}", call_id);
            return Ok(());
        };
        let mut dlg = handle.lock().await;
        match dlg.state {
            DialogState::Answered => {
                dlg.ack_received = true;
                if let Some(id) = dlg.retransmit_timer.take() {
                    self.inner.transactions.timers.cancel(id);
                }
                if let Some(id) = dlg.timer_h.take() {
                    self.inner.transactions.timers.cancel(id);
                }
                dlg.state = DialogState::Established;
                // the dialog is the authoritative record from here on
                if let Some(key) = dlg.server_tx_key.clone() {
                    self.inner.transactions.evict_server(&key);
                }
                info!("call {} established", call_id);
            }
            DialogState::Established => {
                // ACK for a renegotiation 200, nothing to do
            }
            state => debug!("ACK for {} in state {} ignored", call_id, state),
        }
        Ok(())
    }

    async fn on_bye(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(str::to_string) else {
            return Ok(());
        };
        if self.inner.dialogs.get(&call_id).is_none() {
            warn!("BYE for unknown call {}", call_id);
            return Ok(());
        }
        self.send_to(make_response(&request, 200, None).into(), source)
            .await;
        self.emit(CallEvent::Ended {
            call_id: call_id.clone(),
            reason: "bye".to_string(),
        });
        self.cleanup(&call_id).await;
        Ok(())
    }

    /// CANCEL while ringing: 200 to the CANCEL itself, 487 to the
    /// original INVITE, then teardown.
    async fn on_cancel(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(str::to_string) else {
            return Ok(());
        };
        let Some(handle) = self.inner.dialogs.get(&call_id) else {
            debug!("CANCEL for unknown call {}", call_id);
            return Ok(());
        };
        {
            let dlg = handle.lock().await;
            if dlg.direction != DialogDirection::Incoming || dlg.state != DialogState::Ringing {
                debug!("CANCEL for {} in state {} ignored", call_id, dlg.state);
                return Ok(());
            }
            self.send_to(make_response(&request, 200, None).into(), source)
                .await;
            if let (Some(origin), Some(addr), Some(key)) = (
                dlg.origin_request.clone(),
                dlg.origin_addr,
                dlg.server_tx_key.clone(),
            ) {
                let mut terminated = make_response(&origin, 487, None);
                augment_to_tag(&mut terminated, &dlg.local_tag);
                drop(dlg);
                self.respond(&key, terminated, addr).await;
            }
        }
        self.emit(CallEvent::Ended {
            call_id: call_id.clone(),
            reason: "cancelled".to_string(),
        });
        self.cleanup(&call_id).await;
        Ok(())
    }

    /// INFO is only interesting as a DTMF carrier; everything else is
    /// acknowledged and dropped.
    async fn on_info(&self, request: Request, source: SocketAddr) -> Result<()> {
        let Some(call_id) = request.call_id().map(str::to_string) else {
            return Ok(());
        };
        if self.inner.dialogs.get(&call_id).is_none() {
            warn!("INFO for unknown call {}", call_id);
            return Ok(());
        }
        let is_dtmf = request
            .headers
            .get("Content-Type")
            .map(|ct| ct.to_ascii_lowercase().contains(DTMF_CONTENT_TYPE))
            .unwrap_or(false);
        if is_dtmf {
            if let Some((digit, duration)) = parse_dtmf(&request.body) {
                GatewayMetrics::incr(&self.inner.metrics.dtmf_digits_received);
                debug!("DTMF {} ({} ms) on {}", digit, duration, call_id);
                self.emit(CallEvent::Dtmf {
                    call_id: call_id.clone(),
                    digit,
                    duration,
                });
            }
        }
        self.send_to(make_response(&request, 200, None).into(), source)
            .await;
        Ok(())
    }

    async fn on_options(&self, request: Request, source: SocketAddr) -> Result<()> {
        let mut resp = make_response(&request, 200, None);
        resp.headers
            .set("Allow", crate::sip::builder::ALLOW_METHODS);
        self.send_to(resp.into(), source).await;
        Ok(())
    }
}
