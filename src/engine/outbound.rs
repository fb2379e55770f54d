use crate::engine::dialog::{Dialog, DialogState};
use crate::engine::SignalingEngine;
use crate::event::CallEvent;
use crate::metrics::GatewayMetrics;
use crate::relay::RelayProfile;
use crate::sip::builder::{gateway_contact, gateway_via, make_request, ALLOW_METHODS};
use crate::sip::message::{uri_of, Method, Request, Response};
use crate::sip::make_branch;
use crate::transaction::TransactionKey;
use crate::{Error, Result};
use tracing::{debug, info, warn};

fn event_reason(error: &Error) -> &'static str {
    match error {
        Error::SdpValidation(_) => "validation-error",
        Error::Relay(_) => "relay-error",
        _ => "internal-error",
    }
}

impl SignalingEngine {
    /// Places a call from a browser peer toward a telephony URI. Returns
    /// the allocated call id; progress arrives as events.
    pub async fn place(&self, peer: &str, target_uri: &str, offer_sdp: &str) -> Result<String> {
        if !self.is_running() {
            return Err(Error::Protocol("gateway is shutting down".to_string()));
        }
        crate::sdp::validate(offer_sdp)?;

        let config = self.inner.config.clone();
        let call_id = self.new_call_id();
        let local_tag = self.new_tag();
        let branch = make_branch();
        let destination = self.resolve_target(target_uri).await?;
        let local_from = format!(
            "\"{}\" <sip:{}@{}>;tag={}",
            peer, peer, config.sip_domain, local_tag
        );

        // reserves the capacity slot; Capacity propagates to the caller
        self.inner.dialogs.insert(Dialog::outgoing(
            call_id.clone(),
            peer.to_string(),
            local_tag.clone(),
            target_uri.to_string(),
            local_from.clone(),
            branch.clone(),
            destination,
        ))?;

        let translated = match self
            .inner
            .relay
            .offer(
                &call_id,
                &local_tag,
                None,
                offer_sdp,
                RelayProfile::outbound_offer(),
            )
            .await
            .and_then(|sdp| crate::sdp::validate(&sdp).map(|_| sdp))
        {
            Ok(sdp) => sdp,
            Err(e) => {
                self.cleanup(&call_id).await;
                return Err(e);
            }
        };

        let via = gateway_via(&config.advertised_addr(), config.local_sip_port, &branch);
        let contact = gateway_contact("SIP Gateway", &config.advertised_addr(), config.local_sip_port);
        let mut invite = make_request(
            Method::Invite,
            target_uri,
            &via,
            &local_from,
            &format!("<{}>", target_uri),
            &call_id,
            1,
            Some(&contact),
        );
        invite.headers.push("Allow", ALLOW_METHODS);
        invite.headers.push("Content-Type", "application/sdp");
        invite.body = translated;

        let key = TransactionKey {
            branch,
            call_id: call_id.clone(),
            cseq: "1 INVITE".to_string(),
        };
        self.inner
            .transactions
            .register_client(key, Method::Invite, call_id.clone());
        self.send_to(invite.into(), destination).await;
        GatewayMetrics::incr(&self.inner.metrics.calls_placed);
        info!("placed call {} for {} -> {}", call_id, peer, target_uri);
        Ok(call_id)
    }

    pub(crate) async fn handle_response(&self, response: Response) -> Result<()> {
        let key = TransactionKey::try_from(&response)?;
        let Some((method, call_id)) = self
            .inner
            .transactions
            .match_response(&key, response.status)
        else {
            return self.on_unmatched_response(response).await;
        };
        match method {
            Method::Invite => self.on_invite_response(&call_id, response).await,
            other => {
                debug!("{} response for {} ignored", response.status, other);
                Ok(())
            }
        }
    }

    /// A 2xx retransmitted after its transaction finished means our ACK
    /// was lost; answer it with the remembered ACK. Anything else is a
    /// stray and gets dropped.
    async fn on_unmatched_response(&self, response: Response) -> Result<()> {
        if !(200..300).contains(&response.status) {
            debug!("stray response {} dropped", response.status);
            return Ok(());
        }
        let Some(call_id) = response.call_id() else {
            return Ok(());
        };
        let Some(handle) = self.inner.dialogs.get(call_id) else {
            return Ok(());
        };
        let dlg = handle.lock().await;
        if dlg.state == DialogState::Established {
            if let (Some(ack), Some(addr)) = (dlg.last_ack.clone(), dlg.peer_addr) {
                drop(dlg);
                debug!("re-answering retransmitted 2xx for {}", call_id);
                self.send_to(ack.into(), addr).await;
            }
        }
        Ok(())
    }

    async fn on_invite_response(&self, call_id: &str, response: Response) -> Result<()> {
        let Some(handle) = self.inner.dialogs.get(call_id) else {
            debug!("late {} for gone dialog {}", response.status, call_id);
            return Ok(());
        };
        let mut dlg = handle.lock().await;
        if dlg.is_terminating() {
            return Ok(());
        }
        match response.status {
            100..=199 => {
                if response.status == 180 && dlg.state == DialogState::Calling {
                    dlg.state = DialogState::Ringing;
                    drop(dlg);
                    self.emit(CallEvent::Ringing {
                        call_id: call_id.to_string(),
                    });
                }
                Ok(())
            }
            200..=299 => {
                if dlg.state == DialogState::Established {
                    if let (Some(ack), Some(addr)) = (dlg.last_ack.clone(), dlg.peer_addr) {
                        drop(dlg);
                        self.send_to(ack.into(), addr).await;
                    }
                    return Ok(());
                }
                let completed = self.complete_outgoing(&mut dlg, &response).await;
                drop(dlg);
                if let Err(e) = completed {
                    warn!("completing call {} failed: {}", call_id, e);
                    self.emit(CallEvent::Failed {
                        call_id: call_id.to_string(),
                        reason: event_reason(&e).to_string(),
                    });
                    self.cleanup(call_id).await;
                }
                Ok(())
            }
            status => {
                let reason = Self::failure_reason(status, &response.reason);
                drop(dlg);
                info!("call {} failed: {} {}", call_id, status, reason);
                self.emit(CallEvent::Failed {
                    call_id: call_id.to_string(),
                    reason,
                });
                self.cleanup(call_id).await;
                Ok(())
            }
        }
    }

    /// 2xx handling: learn the remote tag, translate the answer for the
    /// browser, and ACK. The ACK goes out before the answered event so a
    /// listener never observes an un-acknowledged established call.
    async fn complete_outgoing(&self, dlg: &mut Dialog, response: &Response) -> Result<()> {
        let remote_tag = response
            .to_tag()
            .ok_or_else(|| Error::Protocol("2xx without To tag".to_string()))?
            .to_string();
        dlg.remote_tag = Some(remote_tag.clone());
        dlg.state = DialogState::Established;

        let translated = self
            .inner
            .relay
            .answer(
                &dlg.call_id,
                &dlg.local_tag,
                &remote_tag,
                &response.body,
                RelayProfile::outbound_answer(),
            )
            .await?;
        crate::sdp::validate(&translated)?;

        let (ack, destination) = self.compose_ack(dlg, response).await?;
        self.send_to(ack.clone().into(), destination).await;
        dlg.last_ack = Some(ack);
        dlg.peer_addr = Some(destination);

        self.emit(CallEvent::Answered {
            call_id: dlg.call_id.clone(),
            sdp: translated,
        });
        Ok(())
    }

    /// The ACK for a 2xx is transaction-less: new branch, routed to the
    /// Contact the answer named, falling back to the upstream server.
    async fn compose_ack(
        &self,
        dlg: &Dialog,
        response: &Response,
    ) -> Result<(Request, std::net::SocketAddr)> {
        let config = &self.inner.config;
        let target = dlg.target_uri.clone().ok_or_else(|| {
            Error::Dialog("missing target URI".to_string(), dlg.call_id.clone())
        })?;
        let contact_uri = response
            .headers
            .get("Contact")
            .map(|c| uri_of(c).to_string())
            .unwrap_or_else(|| target.clone());
        let destination = self.resolve_target(&contact_uri).await?;

        let from = dlg.local_from.clone().ok_or_else(|| {
            Error::Dialog("missing local identity".to_string(), dlg.call_id.clone())
        })?;
        let to = response
            .headers
            .get("To")
            .unwrap_or(&target)
            .to_string();
        let via = gateway_via(
            &config.advertised_addr(),
            config.local_sip_port,
            &make_branch(),
        );
        let ack = make_request(
            Method::Ack,
            &contact_uri,
            &via,
            &from,
            &to,
            &dlg.call_id,
            dlg.invite_cseq,
            None,
        );
        Ok((ack, destination))
    }
}
