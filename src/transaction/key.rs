use crate::sip::message::{Request, Response};
use crate::{Error, Result};
use std::hash::Hash;

/// Transaction identity: top-Via branch, Call-ID, and the full CSeq value.
/// Keeping the method inside the CSeq component means an INVITE and the
/// CANCEL sent on its branch occupy distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub call_id: String,
    pub cseq: String,
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.call_id, self.cseq, self.branch)
    }
}

impl TryFrom<&Request> for TransactionKey {
    type Error = Error;

    fn try_from(request: &Request) -> Result<Self> {
        let branch = request
            .branch()
            .ok_or_else(|| Error::Protocol("request Via has no branch".to_string()))?
            .to_string();
        let call_id = request
            .call_id()
            .ok_or_else(|| Error::Protocol("request has no Call-ID".to_string()))?
            .to_string();
        let cseq = request
            .headers
            .get("CSeq")
            .ok_or_else(|| Error::Protocol("request has no CSeq".to_string()))?
            .to_string();
        Ok(TransactionKey {
            branch,
            call_id,
            cseq,
        })
    }
}

impl TryFrom<&Response> for TransactionKey {
    type Error = Error;

    fn try_from(response: &Response) -> Result<Self> {
        let branch = response
            .branch()
            .ok_or_else(|| Error::Protocol("response Via has no branch".to_string()))?
            .to_string();
        let call_id = response
            .call_id()
            .ok_or_else(|| Error::Protocol("response has no Call-ID".to_string()))?
            .to_string();
        let cseq = response
            .headers
            .get("CSeq")
            .ok_or_else(|| Error::Protocol("response has no CSeq".to_string()))?
            .to_string();
        Ok(TransactionKey {
            branch,
            call_id,
            cseq,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::parse::parse_message;
    use crate::sip::SipMessage;

    #[test]
    fn test_invite_and_cancel_keys_differ() {
        let invite = "INVITE sip:a@b SIP/2.0\r\n\
            Via: SIP/2.0/UDP h:5060;branch=z9hG4bKshared\r\n\
            Call-ID: c@h\r\nCSeq: 1 INVITE\r\n\
            From: <sip:x@h>;tag=t\r\nTo: <sip:a@b>\r\n\r\n";
        let cancel = invite
            .replace("INVITE sip:a@b", "CANCEL sip:a@b")
            .replace("1 INVITE", "1 CANCEL");
        let invite_key = match parse_message(invite).unwrap() {
            SipMessage::Request(req) => TransactionKey::try_from(&req).unwrap(),
            _ => unreachable!(),
        };
        let cancel_key = match parse_message(&cancel).unwrap() {
            SipMessage::Request(req) => TransactionKey::try_from(&req).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(invite_key.branch, cancel_key.branch);
        assert_ne!(invite_key, cancel_key);
    }

    #[test]
    fn test_response_key_matches_request_key() {
        let invite = "INVITE sip:a@b SIP/2.0\r\n\
            Via: SIP/2.0/UDP h:5060;branch=z9hG4bKabc\r\n\
            Call-ID: c@h\r\nCSeq: 7 INVITE\r\n\
            From: <sip:x@h>;tag=t\r\nTo: <sip:a@b>\r\n\r\n";
        let ringing = "SIP/2.0 180 Ringing\r\n\
            Via: SIP/2.0/UDP h:5060;branch=z9hG4bKabc\r\n\
            Call-ID: c@h\r\nCSeq: 7 INVITE\r\n\
            From: <sip:x@h>;tag=t\r\nTo: <sip:a@b>;tag=u\r\n\r\n";
        let req_key = match parse_message(invite).unwrap() {
            SipMessage::Request(req) => TransactionKey::try_from(&req).unwrap(),
            _ => unreachable!(),
        };
        let resp_key = match parse_message(ringing).unwrap() {
            SipMessage::Response(resp) => TransactionKey::try_from(&resp).unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(req_key, resp_key);
    }
}
