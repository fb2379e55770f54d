use serde::Serialize;

fn is_false(v: &bool) -> bool {
    !*v
}

/// Per-direction, per-phase instructions for the media daemon. The relay
/// both bridges plain RTP with DTLS-SRTP and mediates ICE, so what it
/// should emit depends on which leg the translated SDP is headed for.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_protocol: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtls: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtcp_mux: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub codec_strip: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub codec_offer: Vec<&'static str>,
    #[serde(skip_serializing_if = "is_false")]
    pub generate_mid: bool,
}

impl RelayProfile {
    /// Browser offer rewritten for the telephony leg: plain RTP, no ICE,
    /// G.711 only.
    pub fn outbound_offer() -> Self {
        RelayProfile {
            transport_protocol: Some("RTP/AVP"),
            ice: Some("remove"),
            rtcp_mux: Some("demux"),
            codec_strip: vec!["opus"],
            codec_offer: vec!["PCMU", "PCMA"],
            ..Default::default()
        }
    }

    /// Telephony 200 answer rewritten for the browser leg.
    pub fn outbound_answer() -> Self {
        RelayProfile {
            transport_protocol: Some("UDP/TLS/RTP/SAVPF"),
            ice: Some("force"),
            dtls: Some("passive"),
            rtcp_mux: Some("offer"),
            codec_strip: vec!["telephone-event"],
            codec_offer: vec!["opus", "PCMU", "PCMA"],
            ..Default::default()
        }
    }

    /// Telephony offer rewritten for the browser leg.
    pub fn inbound_offer() -> Self {
        RelayProfile {
            transport_protocol: Some("UDP/TLS/RTP/SAVPF"),
            ice: Some("force"),
            dtls: Some("passive"),
            rtcp_mux: Some("require"),
            ..Default::default()
        }
    }

    /// Browser answer toward telephony carries the minimal payload; the
    /// daemon reuses the parameters of the offer phase.
    pub fn inbound_answer() -> Self {
        RelayProfile::default()
    }

    /// Mid-dialog renegotiation: the translated offer is browser-bound
    /// either way, so transport/ICE mirror what the original direction
    /// used for its browser-facing phase, and `generate-mid` is set.
    pub fn reinvite(incoming_dialog: bool) -> Self {
        RelayProfile {
            transport_protocol: Some("UDP/TLS/RTP/SAVPF"),
            ice: Some("force"),
            dtls: Some("passive"),
            rtcp_mux: Some(if incoming_dialog { "require" } else { "offer" }),
            generate_mid: true,
            ..Default::default()
        }
    }
}
