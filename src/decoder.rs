use crate::error::{Error, ProtocolError};
use crate::frame::{Frame, OpCode, MAX_CONTROL_FRAME_PAYLOAD};
use bytes::{Buf, BytesMut};

/// Where the decoder is within one frame's header. Mirrors the order the
/// teacher's (since-folded-in) frame reader pulled fields off the socket in;
/// here they're pulled apart into explicit states because the decoder consumes
/// an append-only in-memory buffer instead of blocking on a socket read, so a
/// partial frame has to be representable between `decode()` calls rather than
/// just `.await`ed through.
#[derive(Debug, Clone)]
enum DecodeState {
    AwaitHeader,
    AwaitExtendedLength { header: HeaderBits },
    AwaitMaskingKey { header: HeaderBits, length: usize },
    AwaitPayload {
        header: HeaderBits,
        length: usize,
        mask: Option<[u8; 4]>,
    },
}

#[derive(Debug, Clone, Copy)]
struct HeaderBits {
    fin: bool,
    opcode: OpCode,
    masked: bool,
    initial_length: u8,
}

/// A stateful, resumable decoder over an append-only byte buffer. One instance
/// corresponds to one connection's receive side; `decode` may be called with
/// however the transport happens to chunk reads, and the state machine resumes
/// exactly where it left off.
///
/// Atomicity guarantee: a frame is either fully produced — and every byte it
/// consumed is removed from `buffer` — or `buffer` is left completely untouched
/// and the call returns with no further frames. There is no partial consumption
/// visible across calls.
pub struct Decoder {
    buffer: BytesMut,
    state: DecodeState,
    max_frame_size: usize,
}

impl Decoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecodeState::AwaitHeader,
            max_frame_size,
        }
    }

    /// Discards any buffered bytes and returns to `AwaitHeader`. Used during
    /// connection cleanup so a reconnect starts the decoder from a clean slate.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecodeState::AwaitHeader;
    }

    /// Appends `chunk` to the internal buffer and drains as many complete
    /// frames as are now available. Returns `Ok(frames)` — empty if more bytes
    /// are needed — or the first protocol violation encountered, at which point
    /// the decoder should be treated as poisoned and the connection torn down.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, Error> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_advance()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Attempts one state transition, consuming bytes from `buffer` only when a
    /// full state's worth of data is available. Returns `Ok(None)` without
    /// touching `buffer` when starved — this is what makes partial reads
    /// resumable and keeps a starved call from ever mutating the buffer.
    fn try_advance(&mut self) -> Result<Option<Frame>, Error> {
        match self.state.clone() {
            DecodeState::AwaitHeader => {
                if self.buffer.len() < 2 {
                    return Ok(None);
                }
                let b0 = self.buffer[0];
                let b1 = self.buffer[1];

                let fin = (b0 & 0b1000_0000) != 0;
                let rsv = b0 & 0b0111_0000;
                if rsv != 0 {
                    return Err(Error::Protocol(ProtocolError::ReservedBitsSet));
                }
                let opcode = OpCode::from_u8(b0 & 0b0000_1111)?;
                if !fin && opcode.is_control() {
                    return Err(Error::Protocol(ProtocolError::ControlFrameFragmented));
                }

                let masked = (b1 & 0b1000_0000) != 0;
                let initial_length = b1 & 0b0111_1111;
                if opcode.is_control() && initial_length as usize > MAX_CONTROL_FRAME_PAYLOAD {
                    return Err(Error::Protocol(ProtocolError::ControlFrameTooLarge));
                }

                self.buffer.advance(2);
                let header = HeaderBits {
                    fin,
                    opcode,
                    masked,
                    initial_length,
                };

                self.state = match initial_length {
                    126 | 127 => DecodeState::AwaitExtendedLength { header },
                    len => DecodeState::AwaitMaskingKey {
                        header,
                        length: len as usize,
                    },
                };
                Ok(None)
            }

            DecodeState::AwaitExtendedLength { header } => {
                let needed = if header.initial_length == 126 { 2 } else { 8 };
                if self.buffer.len() < needed {
                    return Ok(None);
                }

                let length = if needed == 2 {
                    u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize
                } else {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&self.buffer[..8]);
                    if bytes[0] & 0b1000_0000 != 0 {
                        return Err(Error::Protocol(ProtocolError::InvalidExtendedLength));
                    }
                    u64::from_be_bytes(bytes) as usize
                };

                self.buffer.advance(needed);
                self.state = DecodeState::AwaitMaskingKey { header, length };
                Ok(None)
            }

            DecodeState::AwaitMaskingKey { header, length } => {
                if length > self.max_frame_size {
                    return Err(Error::Protocol(ProtocolError::FrameTooLarge));
                }

                if header.masked {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }
                    let mut mask = [0u8; 4];
                    mask.copy_from_slice(&self.buffer[..4]);
                    self.buffer.advance(4);
                    self.state = DecodeState::AwaitPayload {
                        header,
                        length,
                        mask: Some(mask),
                    };
                } else {
                    self.state = DecodeState::AwaitPayload {
                        header,
                        length,
                        mask: None,
                    };
                }
                Ok(None)
            }

            DecodeState::AwaitPayload {
                header,
                length,
                mask,
            } => {
                if self.buffer.len() < length {
                    return Ok(None);
                }

                let mut payload = self.buffer[..length].to_vec();
                self.buffer.advance(length);

                if let Some(mask) = mask {
                    for (i, byte) in payload.iter_mut().enumerate() {
                        *byte ^= mask[i % 4];
                    }
                }

                if header.opcode == OpCode::Text && header.fin {
                    if let Err(e) = std::str::from_utf8(&payload) {
                        return Err(Error::Protocol(ProtocolError::InvalidUtf8(e.to_string())));
                    }
                }

                self.state = DecodeState::AwaitHeader;
                Ok(Some(Frame::new(header.fin, header.opcode, payload)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use crate::message::Message;

    const TEST_MAX_FRAME: usize = 1 << 20;

    #[test]
    fn decodes_a_single_masked_text_frame() {
        let encoder = Encoder::new(1024);
        let wire = encoder
            .encode_message(Message::Text("Hi".to_string()))
            .unwrap();

        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let frames = decoder.decode(&wire).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"Hi");
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert!(frames[0].fin);
    }

    #[test]
    fn resumes_across_arbitrary_chunk_boundaries() {
        let encoder = Encoder::new(1024);
        let wire = encoder
            .encode_message(Message::Text("Hello World!".to_string()))
            .unwrap();

        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let mut collected = Vec::new();
        for byte in &wire {
            collected.extend(decoder.decode(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].payload, b"Hello World!");
    }

    #[test]
    fn buffer_untouched_when_starved() {
        let encoder = Encoder::new(1024);
        let wire = encoder
            .encode_message(Message::Text("partial".to_string()))
            .unwrap();

        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let frames = decoder.decode(&wire[..wire.len() - 1]).unwrap();
        assert!(frames.is_empty());

        let frames = decoder.decode(&wire[wire.len() - 1..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"partial");
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let frame = vec![0b1100_0001, 0x00];
        assert!(decoder.decode(&frame).is_err());
    }

    #[test]
    fn rejects_reserved_opcode() {
        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let frame = vec![0b1000_0011, 0x00];
        assert!(decoder.decode(&frame).is_err());
    }

    #[test]
    fn rejects_oversized_control_frame() {
        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let mut frame = vec![0b1000_1001, 126];
        frame.push(0);
        frame.push(126);
        frame.extend(vec![0u8; 126]);
        assert!(decoder.decode(&frame).is_err());
    }

    #[test]
    fn rejects_frame_above_max_frame_size() {
        let mut decoder = Decoder::new(10);
        let encoder = Encoder::new(1024);
        let wire = encoder
            .encode_message(Message::Binary(vec![0u8; 20]))
            .unwrap();
        assert!(decoder.decode(&wire).is_err());
    }

    #[test]
    fn invalid_utf8_in_a_complete_text_frame_is_rejected() {
        let mut decoder = Decoder::new(TEST_MAX_FRAME);
        let frame = vec![0b1000_0001, 0x02, 0xFF, 0xFE];
        assert!(decoder.decode(&frame).is_err());
    }
}
