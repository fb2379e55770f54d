use crate::sip::message::{Headers, Method, Request, Response};

pub const SIP_VERSION: &str = "SIP/2.0";
pub const ALLOW_METHODS: &str = "INVITE, ACK, CANCEL, OPTIONS, BYE, INFO";
pub const SUPPORTED_EXTENSIONS: &str = "replaces, timer";
pub const USER_AGENT: &str = concat!("sipbridge/", env!("CARGO_PKG_VERSION"));

/// Canonical reason phrases; internal error text never crosses the wire.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        603 => "Decline",
        _ => "Unknown",
    }
}

/// Builds a response for `request`, echoing the Via list and the dialog
/// headers. The Via values are taken as-is, so a NAT-rewritten top Via is
/// echoed verbatim.
pub fn make_response(request: &Request, status: u16, body: Option<String>) -> Response {
    let mut headers = Headers::new();
    for via in request.headers.get_all("Via") {
        headers.push("Via", via);
    }
    for name in ["From", "To", "Call-ID", "CSeq"] {
        if let Some(value) = request.headers.get(name) {
            headers.push(name, value);
        }
    }
    Response {
        version: SIP_VERSION.to_string(),
        status,
        reason: reason_phrase(status).to_string(),
        headers,
        body: body.unwrap_or_default(),
    }
}

/// Appends `;tag=` to the To header unless the peer already tagged it.
pub fn augment_to_tag(response: &mut Response, local_tag: &str) {
    if let Some(to) = response.headers.get_mut("To") {
        if !to.contains(";tag=") {
            to.push_str(";tag=");
            to.push_str(local_tag);
        }
    }
}

/// Contact value naming the gateway at its advertised address.
pub fn gateway_contact(display_name: &str, advertised: &str, port: u16) -> String {
    format!(
        "\"{}\" <sip:gateway@{}:{}>",
        display_name, advertised, port
    )
}

/// Headers every 180/200 from the gateway carries: Contact, Allow,
/// Supported, and a Record-Route pinning the gateway into the route set.
pub fn apply_gateway_headers(response: &mut Response, advertised: &str, port: u16) {
    response
        .headers
        .set("Contact", gateway_contact("SIP Gateway", advertised, port));
    response.headers.set("Allow", ALLOW_METHODS);
    response.headers.set("Supported", SUPPORTED_EXTENSIONS);
    response
        .headers
        .set("Record-Route", format!("<sip:{}:{};lr>", advertised, port));
}

/// Skeleton for an in-dialog or dialog-forming request. The caller fills
/// in body and any extra headers before serializing.
#[allow(clippy::too_many_arguments)]
pub fn make_request(
    method: Method,
    uri: &str,
    via: &str,
    from: &str,
    to: &str,
    call_id: &str,
    cseq: u32,
    contact: Option<&str>,
) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", via);
    headers.push("Max-Forwards", "70");
    headers.push("From", from);
    headers.push("To", to);
    headers.push("Call-ID", call_id);
    headers.push("CSeq", format!("{} {}", cseq, method.as_str()));
    if let Some(contact) = contact {
        headers.push("Contact", contact);
    }
    headers.push("User-Agent", USER_AGENT);
    Request {
        method,
        uri: uri.to_string(),
        version: SIP_VERSION.to_string(),
        headers,
        body: String::new(),
    }
}

/// Via value for a request the gateway originates; `rport` asks the peer
/// to echo the source port back.
pub fn gateway_via(advertised: &str, port: u16, branch: &str) -> String {
    format!("SIP/2.0/UDP {}:{};branch={};rport", advertised, port, branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::parse::parse_message;
    use crate::sip::SipMessage;

    fn sample_request() -> Request {
        let wire = "INVITE sip:alice@gw SIP/2.0\r\n\
            Via: SIP/2.0/UDP 10.0.0.9:5060;branch=z9hG4bK1\r\n\
            From: <sip:bob@10.0.0.9>;tag=bobtag\r\n\
            To: <sip:alice@gw>\r\n\
            Call-ID: abc@10.0.0.9\r\n\
            CSeq: 1 INVITE\r\n\
            \r\n";
        match parse_message(wire).unwrap() {
            SipMessage::Request(req) => req,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_response_echoes_dialog_headers() {
        let req = sample_request();
        let resp = make_response(&req, 180, None);
        assert_eq!(resp.status, 180);
        assert_eq!(resp.reason, "Ringing");
        assert_eq!(resp.headers.get("Call-ID"), Some("abc@10.0.0.9"));
        assert_eq!(resp.headers.get("CSeq"), Some("1 INVITE"));
        assert_eq!(resp.headers.get_all("Via"), req.headers.get_all("Via"));
    }

    #[test]
    fn test_to_tag_added_once() {
        let req = sample_request();
        let mut resp = make_response(&req, 200, None);
        augment_to_tag(&mut resp, "cafe");
        augment_to_tag(&mut resp, "ffff");
        assert_eq!(resp.headers.get("To"), Some("<sip:alice@gw>;tag=cafe"));
    }

    #[test]
    fn test_gateway_headers_present_on_ok() {
        let req = sample_request();
        let mut resp = make_response(&req, 200, None);
        apply_gateway_headers(&mut resp, "203.0.113.5", 5060);
        assert_eq!(
            resp.headers.get("Contact"),
            Some("\"SIP Gateway\" <sip:gateway@203.0.113.5:5060>")
        );
        assert_eq!(resp.headers.get("Allow"), Some(ALLOW_METHODS));
        assert_eq!(resp.headers.get("Supported"), Some("replaces, timer"));
        assert_eq!(
            resp.headers.get("Record-Route"),
            Some("<sip:203.0.113.5:5060;lr>")
        );
    }

    #[test]
    fn test_make_request_shape() {
        let req = make_request(
            Method::Bye,
            "sip:bob@10.0.0.2",
            "SIP/2.0/UDP 203.0.113.5:5060;branch=z9hG4bKxyz;rport",
            "<sip:alice@gw>;tag=local",
            "<sip:bob@10.0.0.2>;tag=remote",
            "abc@gw",
            2,
            None,
        );
        assert_eq!(req.headers.get("CSeq"), Some("2 BYE"));
        assert_eq!(req.headers.get("Max-Forwards"), Some("70"));
        let wire = req.to_string();
        assert!(wire.starts_with("BYE sip:bob@10.0.0.2 SIP/2.0\r\n"));
        assert!(wire.contains("Content-Length: 0\r\n"));
    }
}
