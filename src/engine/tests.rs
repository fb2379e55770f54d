use crate::config::GatewayConfig;
use crate::engine::SignalingEngine;
use crate::event::{CallEvent, EventReceiver};
use crate::metrics::GatewayMetrics;
use crate::relay::MediaRelayClient;
use crate::sip::builder::{augment_to_tag, make_response};
use crate::sip::message::{Method, Request, Response, SipMessage};
use crate::sip::parse::parse_message;
use crate::transport::UdpTransport;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const BROWSER_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n";

const BROWSER_ANSWER_WITH_VIDEO: &str = "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\n";

const PEER_SDP: &str = "v=0\r\no=- 3 3 IN IP4 192.168.1.127\r\nm=audio 49170 RTP/AVP 0\r\n";

/// Scripted media daemon: logs every request and answers `ok`, echoing
/// the requested transport profile into the translated SDP.
async fn fake_relay() -> (String, Arc<StdMutex<Vec<Value>>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    let log: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
    let seen = log.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = serde_json::from_slice::<Value>(&buf[..len]) else {
                continue;
            };
            seen.lock().unwrap().push(request.clone());
            let command = request["command"].as_str().unwrap_or_default();
            let mut reply = json!({"id": request["id"], "result": "ok"});
            if command == "offer" || command == "answer" {
                let proto = request["transport-protocol"]
                    .as_str()
                    .unwrap_or("RTP/AVP");
                reply["sdp"] = Value::String(format!(
                    "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\nm=audio 30000 {} 0\r\n",
                    proto
                ));
            }
            socket
                .send_to(reply.to_string().as_bytes(), from)
                .await
                .ok();
        }
    });
    (addr, log)
}

struct TestGateway {
    engine: SignalingEngine,
    events: EventReceiver,
    sip_addr: SocketAddr,
    metrics: Arc<GatewayMetrics>,
    relay_log: Arc<StdMutex<Vec<Value>>>,
}

async fn test_gateway(max_sessions: usize) -> TestGateway {
    let (relay_addr, relay_log) = fake_relay().await;
    let metrics = Arc::new(GatewayMetrics::default());
    let cancel_token = CancellationToken::new();

    let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let sip_addr = transport.local_addr();

    let relay = MediaRelayClient::connect(&relay_addr, metrics.clone())
        .await
        .unwrap();
    relay.start(cancel_token.child_token());

    let config = Arc::new(GatewayConfig {
        http_port: 0,
        enable_ssl: false,
        ssl_key_path: None,
        ssl_cert_path: None,
        enable_sip_gateway: true,
        sip_server_host: "127.0.0.1".to_string(),
        sip_server_port: 5060,
        sip_domain: "gw.test".to_string(),
        local_sip_port: sip_addr.port(),
        rtpengine_host: "127.0.0.1".to_string(),
        rtpengine_port: 22222,
        public_ip: "127.0.0.1".parse().unwrap(),
        max_sessions,
        log_level: "info".to_string(),
    });

    let (engine, events) =
        SignalingEngine::with_parts(config, transport, relay, metrics.clone(), cancel_token);
    engine.start();
    TestGateway {
        engine,
        events,
        sip_addr,
        metrics,
        relay_log,
    }
}

struct TestPeer {
    socket: UdpSocket,
}

impl TestPeer {
    async fn bind() -> Self {
        TestPeer {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn send(&self, text: &str, to: SocketAddr) {
        self.socket.send_to(text.as_bytes(), to).await.unwrap();
    }

    async fn recv(&self) -> SipMessage {
        let mut buf = vec![0u8; 65536];
        let (len, _) = timeout(Duration::from_secs(2), self.socket.recv_from(&mut buf))
            .await
            .expect("no datagram within 2s")
            .unwrap();
        parse_message(std::str::from_utf8(&buf[..len]).unwrap()).expect("unparseable datagram")
    }

    async fn recv_response(&self) -> Response {
        match self.recv().await {
            SipMessage::Response(resp) => resp,
            SipMessage::Request(req) => panic!("expected response, got {}", req.method),
        }
    }

    async fn recv_request(&self) -> Request {
        match self.recv().await {
            SipMessage::Request(req) => req,
            SipMessage::Response(resp) => panic!("expected request, got {}", resp.status),
        }
    }
}

async fn next_event(events: &mut EventReceiver) -> CallEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event within 2s")
        .expect("event channel closed")
}

fn peer_invite(call_id: &str, branch: &str, cseq: u32, body: &str) -> String {
    format!(
        "INVITE sip:alice@gw.test SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch={};rport\r\n\
         Max-Forwards: 70\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>\r\n\
         Call-ID: {}\r\n\
         CSeq: {} INVITE\r\n\
         Contact: <sip:bob@192.168.1.127:5060>\r\n\
         Content-Type: application/sdp\r\n\
         Content-Length: {}\r\n\
         \r\n{}",
        branch,
        call_id,
        cseq,
        body.len(),
        body
    )
}

/// Drives an inbound call up to the incoming event and returns its id
/// and the original INVITE as the peer sent it.
async fn ring_inbound_call(gw: &mut TestGateway, peer: &TestPeer, call_id: &str) -> String {
    peer.send(
        &peer_invite(call_id, "z9hG4bKinbound1", 1, PEER_SDP),
        gw.sip_addr,
    )
    .await;

    let trying = peer.recv_response().await;
    assert_eq!(trying.status, 100);
    let ringing = peer.recv_response().await;
    assert_eq!(ringing.status, 180);

    match next_event(&mut gw.events).await {
        CallEvent::Incoming {
            call_id: id,
            from,
            to,
            sdp,
        } => {
            assert_eq!(id, call_id);
            assert_eq!(from, "sip:bob@192.168.1.127");
            assert_eq!(to, "alice");
            assert!(sdp.contains("UDP/TLS/RTP/SAVPF"));
        }
        other => panic!("expected incoming event, got {:?}", other),
    }
    ringing.to_tag().expect("180 must carry a To tag").to_string()
}

#[tokio::test]
async fn test_outbound_call_happy_path() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let target = format!("sip:bob@{}", peer.addr());

    let call_id = gw
        .engine
        .place("alice", &target, BROWSER_OFFER)
        .await
        .unwrap();
    assert_eq!(gw.engine.active_calls(), 1);

    let invite = peer.recv_request().await;
    assert_eq!(invite.method, Method::Invite);
    assert_eq!(invite.call_id(), Some(call_id.as_str()));
    assert!(invite.branch().unwrap().starts_with("z9hG4bK"));
    assert!(invite.body.contains("RTP/AVP"), "telephony leg gets plain RTP");
    assert!(!invite.body.contains("SAVPF"));
    assert!(invite.headers.get("Contact").unwrap().contains("gateway@"));
    assert!(invite.from_tag().is_some());

    peer.send(&make_response(&invite, 180, None).to_string(), gw.sip_addr)
        .await;
    match next_event(&mut gw.events).await {
        CallEvent::Ringing { call_id: id } => assert_eq!(id, call_id),
        other => panic!("expected ringing, got {:?}", other),
    }

    let mut ok = make_response(
        &invite,
        200,
        Some("v=0\r\nm=audio 4000 RTP/AVP 0\r\n".to_string()),
    );
    augment_to_tag(&mut ok, "remotetag");
    ok.headers
        .set("Contact", format!("<sip:bob@{}>", peer.addr()));
    peer.send(&ok.to_string(), gw.sip_addr).await;

    let ack = peer.recv_request().await;
    assert_eq!(ack.method, Method::Ack);
    assert_eq!(ack.call_id(), Some(call_id.as_str()));
    assert_eq!(ack.cseq(), Some((1, "ACK".to_string())));
    assert_eq!(ack.to_tag(), Some("remotetag"));

    match next_event(&mut gw.events).await {
        CallEvent::Answered { call_id: id, sdp } => {
            assert_eq!(id, call_id);
            assert!(sdp.contains("UDP/TLS/RTP/SAVPF"), "browser gets SAVPF back");
        }
        other => panic!("expected answered, got {:?}", other),
    }

    let log = gw.relay_log.lock().unwrap();
    assert_eq!(log[0]["command"], "offer");
    assert_eq!(log[0]["ice"], "remove");
    assert_eq!(log[1]["command"], "answer");
    assert_eq!(log[1]["to-tag"], "remotetag");
}

#[tokio::test]
async fn test_outbound_hangup_before_answer_sends_cancel() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let target = format!("sip:bob@{}", peer.addr());

    let call_id = gw
        .engine
        .place("alice", &target, BROWSER_OFFER)
        .await
        .unwrap();
    let invite = peer.recv_request().await;

    gw.engine.hangup(&call_id).await.unwrap();
    let cancel = peer.recv_request().await;
    assert_eq!(cancel.method, Method::Cancel);
    assert_eq!(cancel.branch(), invite.branch(), "CANCEL rides the INVITE branch");
    assert_eq!(cancel.cseq(), Some((1, "CANCEL".to_string())));
    assert_eq!(gw.engine.active_calls(), 1, "cleanup waits for the 487");

    let mut terminated = make_response(&invite, 487, None);
    augment_to_tag(&mut terminated, "remotetag");
    peer.send(&terminated.to_string(), gw.sip_addr).await;

    match next_event(&mut gw.events).await {
        CallEvent::Failed { call_id: id, reason } => {
            assert_eq!(id, call_id);
            assert_eq!(reason, "Request Terminated");
        }
        other => panic!("expected failed, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gw.engine.active_calls(), 0);
}

#[tokio::test]
async fn test_inbound_call_full_lifecycle() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let call_id = "inbound1@192.168.1.127";

    let local_tag = ring_inbound_call(&mut gw, &peer, call_id).await;

    gw.engine
        .answer(call_id, BROWSER_ANSWER_WITH_VIDEO)
        .await
        .unwrap();
    let ok = peer.recv_response().await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.to_tag(), Some(local_tag.as_str()));
    assert!(ok.headers.get("Contact").unwrap().contains("gateway@"));
    assert_eq!(ok.headers.get("Supported"), Some("replaces, timer"));
    assert!(ok.headers.get("Record-Route").is_some());
    assert!(!ok.body.is_empty());

    // NAT fixup is echoed in every response Via
    let via = ok.headers.get("Via").unwrap();
    assert!(via.contains(&format!("rport={}", peer.addr().port())));
    assert!(via.contains("received=127.0.0.1"));

    {
        let log = gw.relay_log.lock().unwrap();
        let answer = log
            .iter()
            .find(|r| r["command"] == "answer")
            .expect("relay answer submitted");
        assert_eq!(answer["from-tag"], "bobtag");
        assert_eq!(answer["to-tag"], local_tag.as_str());
        assert!(answer["transport-protocol"].is_null(), "minimal payload");
        assert!(
            !answer["sdp"].as_str().unwrap().contains("m=video"),
            "video section stripped before submission"
        );
    }

    let ack = format!(
        "ACK sip:gateway@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKack1\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>;tag={}\r\n\
         Call-ID: {}\r\n\
         CSeq: 1 ACK\r\n\r\n",
        local_tag, call_id
    );
    peer.send(&ack, gw.sip_addr).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // DTMF over INFO
    let info = format!(
        "INFO sip:gateway@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKinfo1\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>;tag={}\r\n\
         Call-ID: {}\r\n\
         CSeq: 2 INFO\r\n\
         Content-Type: application/dtmf-relay\r\n\
         Content-Length: 24\r\n\r\n\
         Signal=5\r\nDuration=200\r\n",
        local_tag, call_id
    );
    peer.send(&info, gw.sip_addr).await;
    let info_ok = peer.recv_response().await;
    assert_eq!(info_ok.status, 200);
    assert_eq!(info_ok.cseq(), Some((2, "INFO".to_string())));
    match next_event(&mut gw.events).await {
        CallEvent::Dtmf {
            call_id: id,
            digit,
            duration,
        } => {
            assert_eq!(id, call_id);
            assert_eq!(digit, '5');
            assert_eq!(duration, 200);
        }
        other => panic!("expected dtmf, got {:?}", other),
    }
    assert_eq!(
        gw.metrics
            .dtmf_digits_received
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );

    // remote hangup
    let bye = format!(
        "BYE sip:gateway@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKbye1\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>;tag={}\r\n\
         Call-ID: {}\r\n\
         CSeq: 3 BYE\r\n\r\n",
        local_tag, call_id
    );
    peer.send(&bye, gw.sip_addr).await;
    let bye_ok = peer.recv_response().await;
    assert_eq!(bye_ok.status, 200);
    match next_event(&mut gw.events).await {
        CallEvent::Ended { call_id: id, reason } => {
            assert_eq!(id, call_id);
            assert_eq!(reason, "bye");
        }
        other => panic!("expected ended, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gw.engine.active_calls(), 0);
    let log = gw.relay_log.lock().unwrap();
    let deletes = log.iter().filter(|r| r["command"] == "delete").count();
    assert_eq!(deletes, 1, "exactly one relay delete per call");
}

#[tokio::test]
async fn test_retransmitted_invite_is_replayed_not_redialed() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let call_id = "retrans1@192.168.1.127";
    let wire = peer_invite(call_id, "z9hG4bKretrans", 1, PEER_SDP);

    peer.send(&wire, gw.sip_addr).await;
    assert_eq!(peer.recv_response().await.status, 100);
    let first_ringing = peer.recv_response().await;
    assert_eq!(first_ringing.status, 180);
    match next_event(&mut gw.events).await {
        CallEvent::Incoming { .. } => {}
        other => panic!("expected incoming, got {:?}", other),
    }

    for _ in 0..2 {
        peer.send(&wire, gw.sip_addr).await;
        let replayed = peer.recv_response().await;
        assert_eq!(replayed.status, 180);
        assert_eq!(replayed.to_tag(), first_ringing.to_tag());
    }

    assert_eq!(gw.engine.active_calls(), 1, "exactly one dialog");
    assert_eq!(
        gw.metrics
            .retried_invites
            .load(std::sync::atomic::Ordering::Relaxed),
        2
    );
    let offers = gw
        .relay_log
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r["command"] == "offer")
        .count();
    assert_eq!(offers, 1, "retransmissions never reach the relay");
}

#[tokio::test]
async fn test_invite_with_invalid_body_gets_500() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let wire = peer_invite(
        "badbody1@192.168.1.127",
        "z9hG4bKbadbody",
        1,
        "o=- 1 1 IN IP4 0.0.0.0\r\n",
    );
    peer.send(&wire, gw.sip_addr).await;
    let resp = peer.recv_response().await;
    assert_eq!(resp.status, 500);
    assert_eq!(resp.reason, "Internal Server Error");
    assert_eq!(gw.engine.active_calls(), 0);
    assert!(timeout(Duration::from_millis(200), gw.events.recv())
        .await
        .is_err());
}

#[tokio::test]
async fn test_capacity_overflow_yields_503() {
    let mut gw = test_gateway(1).await;
    let peer = TestPeer::bind().await;
    ring_inbound_call(&mut gw, &peer, "first1@192.168.1.127").await;

    peer.send(
        &peer_invite("second1@192.168.1.127", "z9hG4bKsecond", 1, PEER_SDP),
        gw.sip_addr,
    )
    .await;
    let resp = peer.recv_response().await;
    assert_eq!(resp.status, 503);
    assert_eq!(gw.engine.active_calls(), 1);
}

#[tokio::test]
async fn test_cancel_while_ringing() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let call_id = "cancel1@192.168.1.127";
    ring_inbound_call(&mut gw, &peer, call_id).await;

    let cancel = format!(
        "CANCEL sip:alice@gw.test SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKinbound1;rport\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>\r\n\
         Call-ID: {}\r\n\
         CSeq: 1 CANCEL\r\n\r\n",
        call_id
    );
    peer.send(&cancel, gw.sip_addr).await;

    let cancel_ok = peer.recv_response().await;
    assert_eq!(cancel_ok.status, 200);
    assert_eq!(cancel_ok.cseq(), Some((1, "CANCEL".to_string())));

    let terminated = peer.recv_response().await;
    assert_eq!(terminated.status, 487);
    assert_eq!(terminated.cseq(), Some((1, "INVITE".to_string())));

    match next_event(&mut gw.events).await {
        CallEvent::Ended { call_id: id, reason } => {
            assert_eq!(id, call_id);
            assert_eq!(reason, "cancelled");
        }
        other => panic!("expected ended, got {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gw.engine.active_calls(), 0);
}

#[tokio::test]
async fn test_reject_declines_with_status() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let call_id = "reject1@192.168.1.127";
    let local_tag = ring_inbound_call(&mut gw, &peer, call_id).await;

    gw.engine.reject(call_id, 603).await.unwrap();
    let decline = peer.recv_response().await;
    assert_eq!(decline.status, 603);
    assert_eq!(decline.reason, "Decline");
    assert_eq!(decline.to_tag(), Some(local_tag.as_str()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gw.engine.active_calls(), 0);
    let deletes = gw
        .relay_log
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r["command"] == "delete")
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let call_id = "cleanup1@192.168.1.127";
    ring_inbound_call(&mut gw, &peer, call_id).await;

    gw.engine.cleanup(call_id).await;
    gw.engine.cleanup(call_id).await;

    assert_eq!(gw.engine.active_calls(), 0);
    let deletes = gw
        .relay_log
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r["command"] == "delete")
        .count();
    assert_eq!(deletes, 1, "double cleanup still deletes once");
}

#[tokio::test]
async fn test_reinvite_renegotiates_established_call() {
    let mut gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let call_id = "hold1@192.168.1.127";
    let local_tag = ring_inbound_call(&mut gw, &peer, call_id).await;

    gw.engine.answer(call_id, BROWSER_OFFER).await.unwrap();
    assert_eq!(peer.recv_response().await.status, 200);
    let ack = format!(
        "ACK sip:gateway@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKack2\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>;tag={}\r\n\
         Call-ID: {}\r\n\
         CSeq: 1 ACK\r\n\r\n",
        local_tag, call_id
    );
    peer.send(&ack, gw.sip_addr).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let hold_sdp = "v=0\r\no=- 4 4 IN IP4 192.168.1.127\r\n\
        m=audio 49170 RTP/AVP 0\r\na=sendonly\r\n";
    let reinvite = format!(
        "INVITE sip:alice@gw.test SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKhold;rport\r\n\
         From: \"Bob\" <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>;tag={}\r\n\
         Call-ID: {}\r\n\
         CSeq: 2 INVITE\r\n\
         Content-Type: application/sdp\r\n\
         Content-Length: {}\r\n\r\n{}",
        local_tag,
        call_id,
        hold_sdp.len(),
        hold_sdp
    );
    peer.send(&reinvite, gw.sip_addr).await;

    let ok = peer.recv_response().await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.cseq(), Some((2, "INVITE".to_string())));
    assert!(!ok.body.is_empty());

    match next_event(&mut gw.events).await {
        CallEvent::Renegotiation { call_id: id, sdp } => {
            assert_eq!(id, call_id);
            assert!(sdp.contains("UDP/TLS/RTP/SAVPF"));
        }
        other => panic!("expected renegotiation, got {:?}", other),
    }

    assert_eq!(
        gw.metrics
            .re_invites
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    let log = gw.relay_log.lock().unwrap();
    let renegotiation = log
        .iter()
        .filter(|r| r["command"] == "offer")
        .last()
        .unwrap();
    assert_eq!(renegotiation["from-tag"], "bobtag");
    assert_eq!(renegotiation["to-tag"], local_tag.as_str());
    assert_eq!(renegotiation["generate-mid"], true);
}

#[tokio::test]
async fn test_unknown_method_gets_501() {
    let gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let wire = "SUBSCRIBE sip:alice@gw.test SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKsub\r\n\
         From: <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:alice@gw.test>\r\n\
         Call-ID: sub1@192.168.1.127\r\n\
         CSeq: 1 SUBSCRIBE\r\n\r\n";
    peer.send(wire, gw.sip_addr).await;
    let resp = peer.recv_response().await;
    assert_eq!(resp.status, 501);
    assert_eq!(resp.reason, "Not Implemented");
}

#[tokio::test]
async fn test_options_is_answered_with_allow() {
    let gw = test_gateway(8).await;
    let peer = TestPeer::bind().await;
    let wire = "OPTIONS sip:gateway@127.0.0.1 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 192.168.1.127:5060;branch=z9hG4bKopt\r\n\
         From: <sip:bob@192.168.1.127>;tag=bobtag\r\n\
         To: <sip:gateway@127.0.0.1>\r\n\
         Call-ID: opt1@192.168.1.127\r\n\
         CSeq: 1 OPTIONS\r\n\r\n";
    peer.send(wire, gw.sip_addr).await;
    let resp = peer.recv_response().await;
    assert_eq!(resp.status, 200);
    assert!(resp.headers.get("Allow").unwrap().contains("INVITE"));
}
