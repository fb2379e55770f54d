use crate::{Error, Result};
use serde_json::Value;

/// Flattens the session-description carrier the browser layer sends:
/// either a bare string or a `{type, sdp}` object. This happens at the
/// hub boundary; the engine only ever sees strings.
pub fn flatten(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("sdp").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Every SDP crossing the gateway must be non-empty, open with `v=`, and
/// describe at least one audio or video stream.
pub fn validate(sdp: &str) -> Result<()> {
    if sdp.trim().is_empty() {
        return Err(Error::SdpValidation("empty SDP".to_string()));
    }
    if !sdp.trim_start().starts_with("v=") {
        return Err(Error::SdpValidation(
            "SDP does not start with v=".to_string(),
        ));
    }
    let has_media = sdp
        .lines()
        .any(|l| l.starts_with("m=audio ") || l.starts_with("m=video "));
    if !has_media {
        return Err(Error::SdpValidation("SDP has no media section".to_string()));
    }
    Ok(())
}

/// Drops any `m=video` section (the m-line and everything up to the next
/// m-line) from a browser answer bound for the audio-only telephony leg.
pub fn strip_video(sdp: &str) -> String {
    let newline = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let mut kept = Vec::new();
    let mut in_video = false;
    for line in sdp.lines() {
        if line.starts_with("m=") {
            in_video = line.starts_with("m=video ") || line == "m=video";
        }
        if !in_video {
            kept.push(line);
        }
    }
    let mut out = kept.join(newline);
    if sdp.ends_with('\n') {
        out.push_str(newline);
    }
    out
}
