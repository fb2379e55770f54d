use std::fmt;

/// Methods the gateway understands. Anything else round-trips through
/// `Other` and is answered `501 Not Implemented` by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Info,
    Options,
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Method {
        match token.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "INFO" => Method::Info,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Info => "INFO",
            Method::Options => "OPTIONS",
            Method::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            name: canonical_name(&name.into()),
            value: value.into(),
        }
    }
}

/// Ordered header list. Lookups are case-insensitive and return the first
/// occurrence; Via is the one header kept and emitted as a full list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.0.push(Header::new(name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let canonical = canonical_name(name);
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(&canonical))
            .map(|h| h.value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let canonical = canonical_name(name);
        self.0
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(&canonical))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        let canonical = canonical_name(name);
        self.0
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(&canonical))
            .map(|h| &mut h.value)
    }

    /// Replaces the first occurrence, or appends when absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.push(name, value),
        }
    }

    pub fn remove(&mut self, name: &str) {
        let canonical = canonical_name(name);
        self.0.retain(|h| !h.name.eq_ignore_ascii_case(&canonical));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Expands compact forms and canonicalizes the capitalization of
/// well-known names. Unknown names pass through untouched.
pub fn canonical_name(name: &str) -> String {
    let name = name.trim();
    if name.len() == 1 {
        match name.to_ascii_lowercase().as_str() {
            "v" => return "Via".to_string(),
            "f" => return "From".to_string(),
            "t" => return "To".to_string(),
            "i" => return "Call-ID".to_string(),
            "m" => return "Contact".to_string(),
            "c" => return "Content-Type".to_string(),
            "l" => return "Content-Length".to_string(),
            "k" => return "Supported".to_string(),
            _ => {}
        }
    }
    const WELL_KNOWN: &[&str] = &[
        "Via",
        "From",
        "To",
        "Call-ID",
        "CSeq",
        "Contact",
        "Content-Type",
        "Content-Length",
        "Max-Forwards",
        "Allow",
        "Supported",
        "Record-Route",
        "Route",
        "User-Agent",
        "Expires",
        "Authorization",
        "WWW-Authenticate",
    ];
    for known in WELL_KNOWN {
        if known.eq_ignore_ascii_case(name) {
            return (*known).to_string();
        }
    }
    name.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl Request {
    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID")
    }

    pub fn cseq(&self) -> Option<(u32, String)> {
        parse_cseq(self.headers.get("CSeq")?)
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.headers.get("From").and_then(tag_of)
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.headers.get("To").and_then(tag_of)
    }

    pub fn top_via(&self) -> Option<&str> {
        self.headers.get("Via")
    }

    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(branch_of)
    }
}

impl Response {
    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID")
    }

    pub fn cseq(&self) -> Option<(u32, String)> {
        parse_cseq(self.headers.get("CSeq")?)
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.headers.get("To").and_then(tag_of)
    }

    pub fn branch(&self) -> Option<&str> {
        self.headers.get("Via").and_then(branch_of)
    }

    pub fn is_provisional(&self) -> bool {
        self.status < 200
    }

    pub fn is_final(&self) -> bool {
        self.status >= 200
    }
}

pub fn parse_cseq(value: &str) -> Option<(u32, String)> {
    let mut parts = value.split_whitespace();
    let seq = parts.next()?.parse::<u32>().ok()?;
    let method = parts.next()?.to_string();
    Some((seq, method))
}

/// The `tag` parameter of a From/To value, if present.
pub fn tag_of(value: &str) -> Option<&str> {
    for param in value.split(';').skip(1) {
        let param = param.trim();
        if let Some(tag) = param.strip_prefix("tag=") {
            return Some(tag.trim());
        }
    }
    None
}

/// The `branch` parameter of a Via value, if present.
pub fn branch_of(value: &str) -> Option<&str> {
    for param in value.split(';').skip(1) {
        let param = param.trim();
        if let Some(branch) = param.strip_prefix("branch=") {
            return Some(branch.trim());
        }
    }
    None
}

/// The bare URI inside a From/To/Contact value: angle brackets stripped,
/// display name and header parameters dropped.
pub fn uri_of(value: &str) -> &str {
    if let Some(start) = value.find('<') {
        if let Some(end) = value[start..].find('>') {
            return &value[start + 1..start + end];
        }
    }
    value.split(';').next().unwrap_or(value).trim()
}

/// The user part of a SIP URI (`sip:alice@host` → `alice`).
pub fn uri_user(uri: &str) -> Option<&str> {
    let rest = uri.split_once(':').map(|(_, r)| r).unwrap_or(uri);
    rest.split_once('@').map(|(user, _)| user)
}

/// Host and optional port of a SIP URI, parameters stripped.
pub fn uri_host_port(uri: &str) -> (String, Option<u16>) {
    let rest = uri.split_once(':').map(|(_, r)| r).unwrap_or(uri);
    let rest = rest.split_once('@').map(|(_, h)| h).unwrap_or(rest);
    let rest = rest
        .split(|c| c == ';' || c == '?')
        .next()
        .unwrap_or(rest)
        .trim();
    match rest.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(p) => (host.to_string(), Some(p)),
            Err(_) => (rest.to_string(), None),
        },
        None => (rest.to_string(), None),
    }
}

fn write_headers(f: &mut fmt::Formatter<'_>, headers: &Headers, body: &str) -> fmt::Result {
    let mut has_content_length = false;
    for header in headers.iter() {
        if header.name == "Content-Length" {
            has_content_length = true;
        }
        write!(f, "{}: {}\r\n", header.name, header.value)?;
    }
    if !has_content_length {
        write!(f, "Content-Length: {}\r\n", body.len())?;
    }
    write!(f, "\r\n{}", body)
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.uri, self.version)?;
        write_headers(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.version, self.status, self.reason)?;
        write_headers(f, &self.headers, &self.body)
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(r) => r.fmt(f),
            SipMessage::Response(r) => r.fmt(f),
        }
    }
}

impl From<Request> for SipMessage {
    fn from(r: Request) -> Self {
        SipMessage::Request(r)
    }
}

impl From<Response> for SipMessage {
    fn from(r: Response) -> Self {
        SipMessage::Response(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.push("CALL-ID", "abc@host");
        assert_eq!(headers.get("call-id"), Some("abc@host"));
        assert_eq!(headers.get("Call-ID"), Some("abc@host"));
    }

    #[test]
    fn test_compact_names_expand() {
        assert_eq!(canonical_name("v"), "Via");
        assert_eq!(canonical_name("f"), "From");
        assert_eq!(canonical_name("t"), "To");
        assert_eq!(canonical_name("i"), "Call-ID");
        assert_eq!(canonical_name("m"), "Contact");
        assert_eq!(canonical_name("c"), "Content-Type");
        assert_eq!(canonical_name("l"), "Content-Length");
        assert_eq!(canonical_name("k"), "Supported");
    }

    #[test]
    fn test_well_known_capitalization() {
        assert_eq!(canonical_name("cseq"), "CSeq");
        assert_eq!(canonical_name("CONTENT-LENGTH"), "Content-Length");
        assert_eq!(canonical_name("X-Custom"), "X-Custom");
    }

    #[test]
    fn test_uri_helpers() {
        let value = "\"Alice\" <sip:alice@10.0.0.2:5070;transport=udp>;tag=deadbeef";
        assert_eq!(uri_of(value), "sip:alice@10.0.0.2:5070;transport=udp");
        assert_eq!(tag_of(value), Some("deadbeef"));
        let uri = uri_of(value);
        assert_eq!(uri_user(uri), Some("alice"));
        assert_eq!(uri_host_port(uri), ("10.0.0.2".to_string(), Some(5070)));
        assert_eq!(
            uri_host_port("sip:bob@example.com"),
            ("example.com".to_string(), None)
        );
    }

    #[test]
    fn test_content_length_inserted_on_serialize() {
        let request = Request {
            method: Method::Invite,
            uri: "sip:bob@example.com".into(),
            version: "SIP/2.0".into(),
            headers: Headers::new(),
            body: "v=0\r\n".into(),
        };
        let wire = request.to_string();
        assert!(wire.contains("Content-Length: 5\r\n"));
        assert!(wire.ends_with("\r\n\r\nv=0\r\n"));
    }
}
