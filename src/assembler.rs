use crate::error::{Error, ProtocolError};
use crate::frame::{Frame, OpCode};
use crate::message::Message;
use std::time::{Duration, Instant};

/// A data message (text or binary) whose fragments have started arriving but
/// whose final frame hasn't yet. Control frames never appear here — they pass
/// straight through the assembler regardless of whether a data message is
/// mid-flight, per RFC 6455's interleaving rule.
struct PartialMessage {
    kind: OpCode,
    fragments: Vec<u8>,
    started_at: Instant,
}

/// Reassembles the frame stream produced by `Decoder` into complete `Message`s.
///
/// Grounded in the teacher's fragmented-message handling (continuation frames
/// accumulated until `fin`), generalized with an explicit reassembly timeout and
/// a running size check so a peer can't force unbounded buffering by never
/// sending the final fragment.
pub struct MessageAssembler {
    partial: Option<PartialMessage>,
    max_message_size: usize,
    fragment_timeout: Duration,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize, fragment_timeout: Duration) -> Self {
        Self {
            partial: None,
            max_message_size,
            fragment_timeout,
        }
    }

    /// Feeds one frame into the assembler. Returns `Some(message)` once a
    /// complete message (control frame, or fully reassembled data message) is
    /// available, `None` if the frame only advanced a fragmented message still
    /// in progress.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, Error> {
        if frame.opcode.is_control() {
            return Ok(Some(Message::from_single_frame(frame)?));
        }

        if self.is_overdue() {
            self.partial = None;
            return Err(Error::Protocol(ProtocolError::FragmentTimeout));
        }

        match frame.opcode {
            OpCode::Continuation => self.push_continuation(frame),
            OpCode::Text | OpCode::Binary => self.push_initial(frame),
            OpCode::Close | OpCode::Ping | OpCode::Pong => unreachable!("handled above"),
        }
    }

    fn push_initial(&mut self, frame: Frame) -> Result<Option<Message>, Error> {
        if self.partial.is_some() {
            return Err(Error::Protocol(ProtocolError::UnexpectedNonContinuation));
        }

        if frame.fin {
            return Ok(Some(Message::from_single_frame(frame)?));
        }

        if frame.payload.len() > self.max_message_size {
            return Err(Error::Protocol(ProtocolError::MessageTooLarge));
        }

        self.partial = Some(PartialMessage {
            kind: frame.opcode,
            fragments: frame.payload,
            started_at: Instant::now(),
        });
        Ok(None)
    }

    fn push_continuation(&mut self, frame: Frame) -> Result<Option<Message>, Error> {
        let partial = self
            .partial
            .as_mut()
            .ok_or(Error::Protocol(ProtocolError::UnexpectedContinuation))?;

        if partial.fragments.len() + frame.payload.len() > self.max_message_size {
            self.partial = None;
            return Err(Error::Protocol(ProtocolError::MessageTooLarge));
        }
        partial.fragments.extend(frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let finished = self.partial.take().expect("checked above");
        let message = Message::from_single_frame(Frame::new(
            true,
            finished.kind,
            finished.fragments,
        ))?;
        Ok(Some(message))
    }

    fn is_overdue(&self) -> bool {
        match &self.partial {
            Some(partial) => partial.started_at.elapsed() > self.fragment_timeout,
            None => false,
        }
    }

    /// Discards any in-progress fragmented message. Used alongside `Decoder::reset`
    /// during connection cleanup.
    pub fn reset(&mut self) {
        self.partial = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfragmented_text_passes_straight_through() {
        let mut assembler = MessageAssembler::new(1024, Duration::from_secs(30));
        let result = assembler
            .push(Frame::new(true, OpCode::Text, b"hi".to_vec()))
            .unwrap();
        assert_eq!(result, Some(Message::Text("hi".to_string())));
    }

    #[test]
    fn reassembles_fragments_in_order() {
        let mut assembler = MessageAssembler::new(1024, Duration::from_secs(30));
        assert_eq!(
            assembler
                .push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
                .unwrap(),
            None
        );
        assert_eq!(
            assembler
                .push(Frame::new(false, OpCode::Continuation, b"lo ".to_vec()))
                .unwrap(),
            None
        );
        let result = assembler
            .push(Frame::new(true, OpCode::Continuation, b"World".to_vec()))
            .unwrap();
        assert_eq!(result, Some(Message::Text("Hello World".to_string())));
    }

    #[test]
    fn control_frames_pass_through_mid_fragmentation() {
        let mut assembler = MessageAssembler::new(1024, Duration::from_secs(30));
        assembler
            .push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap();

        let ping = assembler
            .push(Frame::new(true, OpCode::Ping, Vec::new()))
            .unwrap();
        assert_eq!(ping, Some(Message::Ping(None)));

        let result = assembler
            .push(Frame::new(true, OpCode::Continuation, b"lo".to_vec()))
            .unwrap();
        assert_eq!(result, Some(Message::Text("Hello".to_string())));
    }

    #[test]
    fn continuation_without_a_started_message_is_an_error() {
        let mut assembler = MessageAssembler::new(1024, Duration::from_secs(30));
        let result = assembler.push(Frame::new(true, OpCode::Continuation, b"x".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn data_frame_while_a_message_is_in_progress_is_an_error() {
        let mut assembler = MessageAssembler::new(1024, Duration::from_secs(30));
        assembler
            .push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap();
        let result = assembler.push(Frame::new(true, OpCode::Binary, b"x".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn oversized_reassembly_is_rejected() {
        let mut assembler = MessageAssembler::new(10, Duration::from_secs(30));
        assembler
            .push(Frame::new(false, OpCode::Binary, vec![0u8; 8]))
            .unwrap();
        let result = assembler.push(Frame::new(true, OpCode::Continuation, vec![0u8; 8]));
        assert!(result.is_err());
    }

    #[test]
    fn overdue_fragmented_message_times_out() {
        let mut assembler = MessageAssembler::new(1024, Duration::from_millis(0));
        assembler
            .push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let result = assembler.push(Frame::new(true, OpCode::Continuation, b"lo".to_vec()));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::FragmentTimeout))
        ));
    }
}
