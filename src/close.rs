use crate::frame::MAX_CONTROL_PAYLOAD;

/// Longest close reason that still fits a control frame next to the two
/// status-code bytes.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// Close status codes from RFC 6455 section 7.4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    NormalClosure,
    EndpointUnavailable,
    ProtocolError,
    InvalidMessageType,
    /// Never sent on the wire; reported when a close frame carried no code.
    NoStatusReceived,
    InvalidPayloadData,
    PolicyViolation,
    MessageTooBig,
    MandatoryExtension,
    InternalServerError,
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::NormalClosure => 1000,
            CloseCode::EndpointUnavailable => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::InvalidMessageType => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::InvalidPayloadData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalServerError => 1011,
            CloseCode::Other(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::NormalClosure,
            1001 => CloseCode::EndpointUnavailable,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::InvalidMessageType,
            1005 => CloseCode::NoStatusReceived,
            1007 => CloseCode::InvalidPayloadData,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalServerError,
            other => CloseCode::Other(other),
        }
    }
}

/// Builds a close-frame payload: the status code big-endian, followed by the
/// UTF-8 reason. A blank reason encodes to the code alone, and long reasons
/// are cut at a char boundary so the frame stays within the control limit.
pub fn encode_close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    let reason = reason.trim();
    let mut payload = Vec::with_capacity(2 + reason.len().min(MAX_CLOSE_REASON));
    payload.extend_from_slice(&code.as_u16().to_be_bytes());

    if !reason.is_empty() {
        let mut cut = reason.len().min(MAX_CLOSE_REASON);
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        payload.extend_from_slice(reason[..cut].as_bytes());
    }

    payload
}

/// Inverse of [`encode_close_payload`]. Anything shorter than the two code
/// bytes means the peer sent no status at all.
pub fn decode_close_payload(payload: &[u8]) -> (CloseCode, String) {
    if payload.len() < 2 {
        return (CloseCode::NoStatusReceived, String::new());
    }

    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();

    (CloseCode::from_u16(code), reason)
}
