use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Sender / Receiver Errors
    #[error("channel communication error")]
    CommunicationError,

    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Connection lifecycle errors
    #[error("operation is not valid in the current connection state")]
    InvalidState,

    #[error("timed out establishing the connection")]
    ConnectionTimeout,

    #[error("failed to establish the underlying connection: {0}")]
    ConnectionFailed(String),

    #[error("network error: {0}")]
    Network(String),

    // Handshake Errors
    #[error("server did not respond with HTTP/1.1 101 Switching Protocols: {0}")]
    HandshakeFailed(String),

    #[error("Upgrade: websocket header missing in the response")]
    NoUpgradeHeaderPresent,

    #[error("Connection: Upgrade header missing in the response")]
    NoConnectionHeaderPresent,

    #[error("Sec-WebSocket-Accept header missing from the response")]
    NoSecWebsocketAccept,

    #[error("server's Sec-WebSocket-Accept value does not match the expected key")]
    InvalidAcceptKey,

    // Framing Errors
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    // HTTP / URL errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    // Domain addr parsing error
    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    // Close handshake
    #[error("invalid close code {0}: {1}")]
    InvalidCloseCode(u16, &'static str),
}

/// Sub-taxonomy for `Error::Protocol` — every way a peer can violate RFC 6455
/// framing, fragmentation, or UTF-8 rules. Kept as its own enum (rather than flat
/// variants on `Error`) since the assembler and decoder need to pattern-match on
/// these without dragging in the handshake/transport variants above.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("reserved bits (RSV1-3) must be zero")]
    ReservedBitsSet,

    #[error("reserved or unsupported opcode: {0:#x}")]
    ReservedOpcode(u8),

    #[error("control frames must not be fragmented")]
    ControlFrameFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    #[error("frame payload exceeds the configured max_frame_size")]
    FrameTooLarge,

    #[error("message payload exceeds the configured max_message_size")]
    MessageTooLarge,

    #[error("64-bit payload length has its most significant bit set")]
    InvalidExtendedLength,

    #[error("received a non-continuation data frame while a fragmented message was already in progress")]
    UnexpectedNonContinuation,

    #[error("received a continuation frame with no fragmented message in progress")]
    UnexpectedContinuation,

    #[error("text payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("close frame payload of length 1 is invalid")]
    InvalidCloseFramePayload,

    #[error("fragmented message exceeded its reassembly timeout")]
    FragmentTimeout,
}

impl From<FromUtf8Error> for ProtocolError {
    fn from(e: FromUtf8Error) -> Self {
        ProtocolError::InvalidUtf8(e.to_string())
    }
}

/// The two buckets the reconnect strategies (§4.6) classify an `Error` into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Recoverable,
    Permanent,
}

impl Error {
    /// Classifies this error for the reconnect strategies. Network-layer
    /// failures (timeouts, resets, unreachable hosts, lost connections) are
    /// recoverable; TLS, protocol, and configuration failures are not.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ConnectionTimeout
            | Error::ConnectionFailed(_)
            | Error::Network(_)
            | Error::IOError { .. }
            | Error::Timeout { .. } => ErrorCategory::Recoverable,
            _ => ErrorCategory::Permanent,
        }
    }

    /// A 0-10 severity score consumed by the adaptive reconnect strategy. Purely
    /// network hiccups score low; anything suggesting the server or the
    /// configuration itself is unhealthy scores high.
    pub fn severity(&self) -> u8 {
        match self {
            Error::ConnectionTimeout => 2,
            Error::IOError { .. } | Error::Timeout { .. } => 3,
            Error::Network(_) => 4,
            Error::ConnectionFailed(_) => 5,
            Error::Protocol(_) => 7,
            Error::HandshakeFailed(_) => 6,
            Error::InvalidCloseCode(_, _) => 4,
            _ => 8,
        }
    }
}
