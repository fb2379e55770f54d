pub mod profile;
pub use profile::RelayProfile;

use crate::metrics::GatewayMetrics;
use crate::sip::random_hex;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::UdpSocket, sync::oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const RELAY_TIMEOUT: Duration = Duration::from_secs(5);
pub const RELAY_ATTEMPTS: u32 = 3;
const COOKIE_LEN: usize = 16;

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RelayRequest<'a> {
    id: &'a str,
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sdp: Option<&'a str>,
    #[serde(flatten)]
    profile: RelayProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayReply {
    #[serde(default)]
    pub id: Option<String>,
    pub result: String,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

struct RelayClientInner {
    socket: UdpSocket,
    target: String,
    pending: Mutex<HashMap<String, oneshot::Sender<RelayReply>>>,
    running: AtomicBool,
    metrics: Arc<GatewayMetrics>,
}

/// Request/response client for the external media daemon. Replies are
/// correlated by a per-request cookie; a background task routes them to
/// the waiting caller. Every operation is wrapped in bounded retries with
/// linear backoff, and a non-`ok` result is fatal for that call leg.
#[derive(Clone)]
pub struct MediaRelayClient {
    inner: Arc<RelayClientInner>,
}

impl MediaRelayClient {
    pub async fn connect(target: &str, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(target)
            .await
            .map_err(|e| Error::Relay(format!("connect {}: {}", target, e)))?;
        info!("media relay control channel -> {}", target);
        Ok(MediaRelayClient {
            inner: Arc::new(RelayClientInner {
                socket,
                target: target.to_string(),
                pending: Mutex::new(HashMap::new()),
                running: AtomicBool::new(true),
                metrics,
            }),
        })
    }

    /// Spawns the reply pump. Must run before the first operation.
    pub fn start(&self, cancel_token: CancellationToken) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let len = tokio::select! {
                    _ = cancel_token.cancelled() => return,
                    received = inner.socket.recv(&mut buf) => match received {
                        Ok(len) => len,
                        Err(e) => {
                            warn!("relay receive error: {}", e);
                            continue;
                        }
                    },
                };
                let reply: RelayReply = match serde_json::from_slice(&buf[..len]) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("unparseable relay reply: {}", e);
                        continue;
                    }
                };
                let Some(id) = reply.id.clone() else {
                    debug!("relay reply without id dropped");
                    continue;
                };
                if let Some(waiter) = inner.pending.lock().unwrap().remove(&id) {
                    waiter.send(reply).ok();
                }
            }
        });
    }

    /// Stops accepting new operations; in-flight ones finish or time out.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn ping(&self) -> Result<()> {
        self.call("ping", None, None, None, None, RelayProfile::default())
            .await
            .map(|_| ())
    }

    /// `to_tag` is only set for mid-dialog renegotiations, where the
    /// daemon must address the existing session.
    pub async fn offer(
        &self,
        call_id: &str,
        from_tag: &str,
        to_tag: Option<&str>,
        sdp: &str,
        profile: RelayProfile,
    ) -> Result<String> {
        let reply = self
            .call("offer", Some(call_id), Some(from_tag), to_tag, Some(sdp), profile)
            .await?;
        reply
            .sdp
            .ok_or_else(|| Error::Relay("offer reply carried no sdp".to_string()))
    }

    pub async fn answer(
        &self,
        call_id: &str,
        from_tag: &str,
        to_tag: &str,
        sdp: &str,
        profile: RelayProfile,
    ) -> Result<String> {
        let reply = self
            .call(
                "answer",
                Some(call_id),
                Some(from_tag),
                Some(to_tag),
                Some(sdp),
                profile,
            )
            .await?;
        reply
            .sdp
            .ok_or_else(|| Error::Relay("answer reply carried no sdp".to_string()))
    }

    pub async fn delete(&self, call_id: &str, from_tag: &str) -> Result<()> {
        self.call(
            "delete",
            Some(call_id),
            Some(from_tag),
            None,
            None,
            RelayProfile::default(),
        )
        .await
        .map(|_| ())
    }

    async fn call(
        &self,
        command: &'static str,
        call_id: Option<&str>,
        from_tag: Option<&str>,
        to_tag: Option<&str>,
        sdp: Option<&str>,
        profile: RelayProfile,
    ) -> Result<RelayReply> {
        if !self.is_running() {
            return Err(Error::Relay("relay client is shut down".to_string()));
        }
        let mut last_error = None;
        for attempt in 1..=RELAY_ATTEMPTS {
            GatewayMetrics::incr(&self.inner.metrics.relay_requests);
            match self
                .attempt(command, call_id, from_tag, to_tag, sdp, profile.clone())
                .await
            {
                Ok(reply) if reply.result == "ok" || reply.result == "pong" => {
                    return Ok(reply);
                }
                Ok(reply) => {
                    // the daemon answered: a non-ok result is final
                    GatewayMetrics::incr(&self.inner.metrics.relay_failures);
                    return Err(Error::Relay(format!(
                        "{} rejected: {}",
                        command,
                        reply
                            .error_reason
                            .unwrap_or_else(|| reply.result.clone())
                    )));
                }
                Err(e) => {
                    warn!(
                        "relay {} attempt {}/{} failed: {}",
                        command, attempt, RELAY_ATTEMPTS, e
                    );
                    last_error = Some(e);
                    if attempt < RELAY_ATTEMPTS {
                        GatewayMetrics::incr(&self.inner.metrics.relay_retries);
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }
        GatewayMetrics::incr(&self.inner.metrics.relay_failures);
        Err(last_error.unwrap_or_else(|| {
            Error::Relay(format!("{} failed after {} attempts", command, RELAY_ATTEMPTS))
        }))
    }

    async fn attempt(
        &self,
        command: &'static str,
        call_id: Option<&str>,
        from_tag: Option<&str>,
        to_tag: Option<&str>,
        sdp: Option<&str>,
        profile: RelayProfile,
    ) -> Result<RelayReply> {
        let id = random_hex(COOKIE_LEN);
        let request = RelayRequest {
            id: &id,
            command,
            call_id,
            from_tag,
            to_tag,
            sdp,
            profile,
        };
        let payload = serde_json::to_vec(&request)?;

        let (reply_in, reply_out) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(id.clone(), reply_in);

        if let Err(e) = self.inner.socket.send(&payload).await {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(Error::Relay(format!("send to {}: {}", self.inner.target, e)));
        }

        match tokio::time::timeout(RELAY_TIMEOUT, reply_out).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(Error::Relay("reply channel closed".to_string()))
            }
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(Error::Relay(format!("{} timed out", command)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    /// Scripted relay daemon: answers every request with `make_reply`.
    async fn fake_relay<F>(make_reply: F) -> String
    where
        F: Fn(&Value) -> Value + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let request: Value = serde_json::from_slice(&buf[..len]).unwrap();
                let reply = make_reply(&request);
                socket
                    .send_to(reply.to_string().as_bytes(), from)
                    .await
                    .ok();
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_offer_round_trip() {
        let addr = fake_relay(|request| {
            assert_eq!(request["command"], "offer");
            assert_eq!(request["call-id"], "c1@gw");
            assert_eq!(request["from-tag"], "ft");
            assert_eq!(request["transport-protocol"], "RTP/AVP");
            json!({"id": request["id"], "result": "ok", "sdp": "v=0\r\nm=audio 20000 RTP/AVP 0\r\n"})
        })
        .await;
        let client = MediaRelayClient::connect(&addr, Arc::new(GatewayMetrics::default()))
            .await
            .unwrap();
        client.start(CancellationToken::new());
        let sdp = client
            .offer(
                "c1@gw",
                "ft",
                None,
                "v=0\r\nm=audio 9 X 0\r\n",
                RelayProfile::outbound_offer(),
            )
            .await
            .unwrap();
        assert!(sdp.contains("RTP/AVP"));
    }

    #[tokio::test]
    async fn test_non_ok_result_is_fatal_without_retry() {
        let metrics = Arc::new(GatewayMetrics::default());
        let addr = fake_relay(|request| {
            json!({"id": request["id"], "result": "error", "error-reason": "unknown call"})
        })
        .await;
        let client = MediaRelayClient::connect(&addr, metrics.clone()).await.unwrap();
        client.start(CancellationToken::new());
        let err = client.delete("c1@gw", "ft").await.unwrap_err();
        assert!(err.to_string().contains("unknown call"));
        assert_eq!(
            metrics.relay_requests.load(std::sync::atomic::Ordering::Relaxed),
            1,
            "daemon rejections are not retried"
        );
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_operations() {
        let addr = fake_relay(|request| json!({"id": request["id"], "result": "ok"})).await;
        let client = MediaRelayClient::connect(&addr, Arc::new(GatewayMetrics::default()))
            .await
            .unwrap();
        client.start(CancellationToken::new());
        client.shutdown();
        assert!(client.ping().await.is_err());
    }
}
