use crate::error::{Error, ProtocolError};
use crate::frame::{Frame, OpCode, MAX_CONTROL_FRAME_PAYLOAD};
use crate::message::Message;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Translates `Message`s into the RFC 6455 wire format, with client masking.
///
/// Stateless: every call generates a fresh masking key (per §4.1, "every emitted
/// frame carries a freshly generated random 32-bit masking key"), so there's
/// nothing to carry between calls. Grounded in the teacher's
/// `write.rs::write_frame_client`, generalized to operate on whole messages and
/// to live entirely in memory (no direct socket I/O) so the client orchestrator
/// can hand the resulting bytes to any `Transport`.
pub struct Encoder {
    max_frame_size: usize,
}

impl Encoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Splits a message into the frame sequence described in §4.1: a single
    /// frame if it fits under `max_frame_size`, otherwise fragments with
    /// `continuation` opcodes on every frame after the first. Control-frame
    /// messages (ping/pong/close) are rejected if they exceed 125 bytes, since
    /// RFC 6455 forbids fragmenting them.
    pub fn message_to_frames(&self, message: Message) -> Result<Vec<Frame>, Error> {
        let (opcode, payload) = into_opcode_and_payload(message);

        if opcode.is_control() {
            if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::Protocol(ProtocolError::ControlFrameTooLarge));
            }
            return Ok(vec![Frame::new(true, opcode, payload)]);
        }

        if payload.is_empty() {
            return Ok(vec![Frame::new(true, opcode, payload)]);
        }

        let mut frames = Vec::new();
        for chunk in payload.chunks(self.max_frame_size.max(1)) {
            let frame_opcode = if frames.is_empty() {
                opcode
            } else {
                OpCode::Continuation
            };
            frames.push(Frame::new(false, frame_opcode, chunk.to_vec()));
        }
        if let Some(last) = frames.last_mut() {
            last.fin = true;
        }
        Ok(frames)
    }

    /// Serializes a single frame onto the wire, applying the client masking key.
    /// Layout exactly as in §4.1: first byte is `fin`+opcode, length byte(s)
    /// carry the mask bit plus the 7/7+16/7+64-bit length encoding, followed by
    /// the 4-byte mask and the XOR-masked payload.
    pub fn encode_frame(&self, frame: &Frame) -> Vec<u8> {
        let mut rng = StdRng::from_rng(rand::thread_rng());
        let mask: [u8; 4] = rng.random();

        let mut out = Vec::with_capacity(frame.payload.len() + 14);
        let first_byte = ((frame.fin as u8) << 7) | frame.opcode.as_u8();
        out.push(first_byte);

        let len = frame.payload.len();
        if len <= 125 {
            out.push(0b1000_0000 | len as u8);
        } else if len <= 65535 {
            out.push(0b1000_0000 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(0b1000_0000 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
        out.extend_from_slice(&mask);

        out.extend(
            frame
                .payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % 4]),
        );

        out
    }

    /// Encodes a whole message into the bytes ready to hand to a `Transport`.
    pub fn encode_message(&self, message: Message) -> Result<Vec<u8>, Error> {
        let frames = self.message_to_frames(message)?;
        let mut out = Vec::new();
        for frame in &frames {
            out.extend(self.encode_frame(frame));
        }
        Ok(out)
    }
}

fn into_opcode_and_payload(message: Message) -> (OpCode, Vec<u8>) {
    match message {
        Message::Text(text) => (OpCode::Text, text.into_bytes()),
        Message::Binary(data) => (OpCode::Binary, data),
        Message::Ping(data) => (OpCode::Ping, data.unwrap_or_default()),
        Message::Pong(data) => (OpCode::Pong, data.unwrap_or_default()),
        Message::Close { code, reason } => {
            let mut payload = code.to_be_bytes().to_vec();
            payload.extend(reason.into_bytes());
            (OpCode::Close, payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unmask(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        payload
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4])
            .collect()
    }

    #[test]
    fn single_text_frame_round_trip() {
        let encoder = Encoder::new(1024);
        let wire = encoder
            .encode_message(Message::Text("Hi".to_string()))
            .unwrap();

        assert_eq!(wire[0], 0b1000_0001); // fin=1, opcode=text
        assert_eq!(wire[1] & 0b0111_1111, 2); // payload length
        assert_ne!(wire[1] & 0b1000_0000, 0); // masked bit set

        let mask = [wire[2], wire[3], wire[4], wire[5]];
        let unmasked = unmask(&wire[6..], mask);
        assert_eq!(unmasked, b"Hi");
    }

    #[test]
    fn fragments_large_payloads() {
        let encoder = Encoder::new(4);
        let frames = encoder
            .message_to_frames(Message::Binary(vec![0u8; 10]))
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Binary);
        assert!(!frames[0].fin);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert!(!frames[1].fin);
        assert_eq!(frames[2].opcode, OpCode::Continuation);
        assert!(frames[2].fin);
    }

    #[test]
    fn oversized_ping_is_rejected() {
        let encoder = Encoder::new(1024);
        let result = encoder.message_to_frames(Message::Ping(Some(vec![0u8; 126])));
        assert!(result.is_err());
    }

    #[test]
    fn control_frames_are_never_fragmented() {
        let encoder = Encoder::new(1024);
        let frames = encoder
            .message_to_frames(Message::Ping(Some(vec![0u8; 125])))
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].fin);
    }

    #[test]
    fn every_emitted_frame_is_masked_with_a_4_byte_key() {
        let encoder = Encoder::new(1024);
        let frame = Frame::new(true, OpCode::Binary, vec![1, 2, 3, 4, 5]);
        let wire = encoder.encode_frame(&frame);
        assert_ne!(wire[1] & 0b1000_0000, 0);
        let mask = [wire[2], wire[3], wire[4], wire[5]];
        assert_eq!(unmask(&wire[6..], mask), frame.payload);
    }
}
