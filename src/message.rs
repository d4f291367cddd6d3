use crate::error::{Error, ProtocolError};
use crate::frame::{Frame, OpCode};

/// The unit delivered to the user, once the decoder and assembler have finished
/// with it. `Ping`/`Pong` carry an optional application payload (empty on the
/// wire round-trips to `None` so a heartbeat's own payload-bearing pings aren't
/// confused with a bare keepalive).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Option<Vec<u8>>),
    Pong(Option<Vec<u8>>),
    Close { code: u16, reason: String },
}

impl Message {
    /// Converts a single, already-unfragmented frame into a `Message`. Used both
    /// by the assembler (for control frames, and for unfragmented data frames)
    /// and after fragment reassembly (for the finalized data message).
    pub fn from_single_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => Ok(Message::Text(
                String::from_utf8(frame.payload).map_err(ProtocolError::from)?,
            )),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            OpCode::Ping => Ok(Message::Ping(none_if_empty(frame.payload))),
            OpCode::Pong => Ok(Message::Pong(none_if_empty(frame.payload))),
            OpCode::Close => Ok(parse_close_frame(frame.payload)?),
            OpCode::Continuation => Err(Error::Protocol(ProtocolError::UnexpectedContinuation)),
        }
    }

    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.clone(),
            Message::Ping(data) | Message::Pong(data) => data.clone().unwrap_or_default(),
            Message::Close { reason, .. } => reason.as_bytes().to_vec(),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) => {
                Ok(String::from_utf8(data.clone()).map_err(ProtocolError::from)?)
            }
            _ => Ok(String::new()),
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close { .. })
    }
}

/// Checks a close code against the ranges a client is allowed to *send*,
/// per §6: 1000-1003 and 1007-1011 are the defined application codes,
/// 3000-4999 are reserved for private/application use; 1004-1006, 1012-1015,
/// and anything else are either reserved for received-only use or undefined.
pub fn validate_close_code(code: u16) -> Result<(), Error> {
    match code {
        1000..=1003 | 1007..=1011 | 3000..=4999 => Ok(()),
        1004 => Err(Error::InvalidCloseCode(code, "reserved, must not be sent")),
        1005 => Err(Error::InvalidCloseCode(code, "reserved for \"no status received\"")),
        1006 => Err(Error::InvalidCloseCode(code, "reserved for abnormal closure")),
        1012..=1015 => Err(Error::InvalidCloseCode(code, "reserved")),
        _ => Err(Error::InvalidCloseCode(code, "undefined close code")),
    }
}

fn none_if_empty(payload: Vec<u8>) -> Option<Vec<u8>> {
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Parses a close frame's payload per §4.3: empty payload means code 1005 ("no
/// status received") with an empty reason; otherwise the first two bytes are the
/// big-endian status code and the remainder is a UTF-8 reason. A one-byte payload
/// is invalid — there's no way to carry a partial status code.
fn parse_close_frame(payload: Vec<u8>) -> Result<Message, Error> {
    if payload.is_empty() {
        return Ok(Message::Close {
            code: 1005,
            reason: String::new(),
        });
    }
    if payload.len() == 1 {
        return Err(Error::Protocol(ProtocolError::InvalidCloseFramePayload));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8(payload[2..].to_vec()).map_err(ProtocolError::from)?;
    Ok(Message::Close { code, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_close_frame_is_code_1005() {
        let msg = Message::from_single_frame(Frame::new(true, OpCode::Close, Vec::new())).unwrap();
        assert_eq!(
            msg,
            Message::Close {
                code: 1005,
                reason: String::new()
            }
        );
    }

    #[test]
    fn one_byte_close_frame_is_invalid() {
        let result = Message::from_single_frame(Frame::new(true, OpCode::Close, vec![0x03]));
        assert!(result.is_err());
    }

    #[test]
    fn close_frame_with_code_and_reason() {
        let mut payload = vec![0x03, 0xE9]; // 1001
        payload.extend_from_slice(b"going away");
        let msg = Message::from_single_frame(Frame::new(true, OpCode::Close, payload)).unwrap();
        assert_eq!(
            msg,
            Message::Close {
                code: 1001,
                reason: "going away".to_string()
            }
        );
    }

    #[test]
    fn ping_with_empty_payload_is_none() {
        let msg = Message::from_single_frame(Frame::new(true, OpCode::Ping, Vec::new())).unwrap();
        assert_eq!(msg, Message::Ping(None));
    }

    #[test]
    fn text_frame_requires_valid_utf8() {
        let result = Message::from_single_frame(Frame::new(true, OpCode::Text, vec![0xFF, 0xFE]));
        assert!(result.is_err());
    }

    #[test]
    fn continuation_frame_cannot_become_a_message_on_its_own() {
        let result =
            Message::from_single_frame(Frame::new(true, OpCode::Continuation, vec![1, 2, 3]));
        assert!(result.is_err());
    }

    #[test]
    fn accepts_defined_and_private_use_close_codes() {
        assert!(validate_close_code(1000).is_ok());
        assert!(validate_close_code(1011).is_ok());
        assert!(validate_close_code(3000).is_ok());
        assert!(validate_close_code(4999).is_ok());
    }

    #[test]
    fn rejects_reserved_and_undefined_close_codes() {
        assert!(validate_close_code(1004).is_err());
        assert!(validate_close_code(1005).is_err());
        assert!(validate_close_code(1006).is_err());
        assert!(validate_close_code(1015).is_err());
        assert!(validate_close_code(1016).is_err());
        assert!(validate_close_code(2999).is_err());
    }
}
