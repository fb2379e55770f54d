use crate::sip::message::Request;
use std::net::SocketAddr;

/// Rewrites the top Via of an inbound request when it carries the `rport`
/// token: `rport` gets the actual source port, and `received` the actual
/// source address when the sent-by host or port differ from the datagram
/// source. The rewritten Via is later echoed verbatim in responses, which
/// is what lets a peer behind NAT match its transactions.
///
/// Applying the rewrite twice with the same source yields the same Via.
pub fn rewrite_top_via(request: &mut Request, source: SocketAddr) {
    if let Some(via) = request.headers.get_mut("Via") {
        *via = rewrite_via_value(via, source);
    }
}

fn rewrite_via_value(value: &str, source: SocketAddr) -> String {
    let mut parts = value.split(';').map(str::trim);
    let sent_by = parts.next().unwrap_or("").to_string();
    let params: Vec<&str> = parts.collect();

    let wants_rport = params
        .iter()
        .any(|p| *p == "rport" || p.starts_with("rport="));
    if !wants_rport {
        return value.to_string();
    }

    let (via_host, via_port) = host_port_of_sent_by(&sent_by);
    let source_ip = source.ip().to_string();
    let differs = via_host != source_ip || via_port.unwrap_or(5060) != source.port();

    let mut rewritten = sent_by;
    let mut received_written = false;
    for param in &params {
        if *param == "rport" || param.starts_with("rport=") {
            rewritten.push_str(&format!(";rport={}", source.port()));
        } else if param.starts_with("received=") {
            // refresh a stale received so a second pass is a no-op
            if differs {
                rewritten.push_str(&format!(";received={}", source_ip));
            }
            received_written = true;
        } else {
            rewritten.push(';');
            rewritten.push_str(param);
        }
    }
    if differs && !received_written {
        rewritten.push_str(&format!(";received={}", source_ip));
    }
    rewritten
}

fn host_port_of_sent_by(sent_by: &str) -> (String, Option<u16>) {
    let host_port = sent_by.split_whitespace().last().unwrap_or("");
    match host_port.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(p) => (host.to_string(), Some(p)),
            Err(_) => (host_port.to_string(), None),
        },
        None => (host_port.to_string(), None),
    }
}
