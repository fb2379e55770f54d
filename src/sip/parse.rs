use crate::sip::message::{canonical_name, Headers, Method, Request, Response, SipMessage};
use crate::{Error, Result};

/// Parses one datagram into a request or response. Total on malformed
/// input: every failure is an `Error::Parse` and the caller drops the
/// datagram.
pub fn parse_message(input: &str) -> Result<SipMessage> {
    let (head, body) = split_head_and_body(input);

    let mut lines = unfold_lines(head);
    let start_line = match lines.first() {
        Some(line) if !line.trim().is_empty() => line.trim().to_string(),
        _ => return Err(Error::Parse("empty message".to_string())),
    };
    lines.remove(0);

    let headers = parse_headers(&lines)?;

    if start_line.starts_with("SIP/") {
        let mut parts = start_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        let status = parts
            .next()
            .ok_or_else(|| Error::Parse("missing status code".to_string()))?
            .parse::<u16>()
            .map_err(|e| Error::Parse(format!("invalid status code: {}", e)))?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        Ok(SipMessage::Response(Response {
            version,
            status,
            reason,
            headers,
            body: body.to_string(),
        }))
    } else {
        let mut parts = start_line.split_whitespace();
        let method_token = parts
            .next()
            .ok_or_else(|| Error::Parse("missing method".to_string()))?;
        let uri = parts
            .next()
            .ok_or_else(|| Error::Parse("missing request URI".to_string()))?
            .to_string();
        let version = parts
            .next()
            .ok_or_else(|| Error::Parse("missing version".to_string()))?
            .to_string();
        if !version.starts_with("SIP/") {
            return Err(Error::Parse(format!("invalid version: {}", version)));
        }
        Ok(SipMessage::Request(Request {
            method: Method::parse(method_token),
            uri,
            version,
            headers,
            body: body.to_string(),
        }))
    }
}

fn split_head_and_body(input: &str) -> (&str, &str) {
    if let Some(pos) = input.find("\r\n\r\n") {
        let (head, rest) = input.split_at(pos);
        return (head, &rest[4..]);
    }
    if let Some(pos) = input.find("\n\n") {
        let (head, rest) = input.split_at(pos);
        return (head, &rest[2..]);
    }
    (input, "")
}

/// Joins folded continuation lines (leading SP/HT) onto their header.
fn unfold_lines(head: &str) -> Vec<String> {
    let mut unfolded: Vec<String> = Vec::new();
    for raw in head.lines() {
        let line = raw.trim_end_matches('\r');
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = unfolded.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        unfolded.push(line.to_string());
    }
    unfolded
}

fn parse_headers(lines: &[String]) -> Result<Headers> {
    let mut headers = Headers::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("invalid header line: {}", line)))?;
        let name = canonical_name(name);
        let value = value.trim();
        if name == "Via" {
            // a single Via line may carry a comma-separated list
            for entry in value.split(',') {
                headers.push("Via", entry.trim());
            }
        } else if !headers.contains(&name) {
            // only Via is multi-valued; later occurrences are dropped
            headers.push(&name, value);
        }
    }
    Ok(headers)
}
