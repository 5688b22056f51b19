use std::fmt;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
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

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    // Handshake Errors
    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Compression is enabled but the client offered no permessage-deflate extension")]
    NoDeflateExtension,

    #[error("Handshake rejected by the application")]
    HandshakeRejected,

    #[error("Malformed HTTP upgrade request")]
    InvalidUpgradeRequest,

    #[error("Header line exceeds {0} bytes")]
    HeaderLineTooLong(usize),

    // Framing Errors
    #[error("Frame header needs more bytes")]
    TooFewBytes,

    #[error("64-bit payload length is not supported on this target")]
    Require64Bit,

    #[error("Frame payload incomplete: expected {expected} bytes, have {have}")]
    MissingBytes { expected: usize, have: usize },

    #[error("RSV not zero")]
    RsvNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFrameFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("Client frames must be masked")]
    UnmaskedFrame,

    #[error("Invalid Opcode: {0:#x}")]
    InvalidOpcode(u8),

    // Fragmentation Errors
    #[error("Incoming data frame but there is a fragmented message already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("Max message size reached")]
    MessageTooLarge,

    // Configuration Errors
    #[error("read_buffer_size: `{0}` can't be greater than max_message_size: `{1}`")]
    InvalidConfig(usize, usize),

    #[error("read_buffer_size above 65535 requires a 64-bit build")]
    ReadBufferRequires64Bit,
}

impl Error {
    /// True for the peer-loss kinds the engine swallows silently instead of
    /// reporting through the error callback.
    pub fn is_benign_disconnect(&self) -> bool {
        match self {
            Error::IOError { source } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// An error plus the source location that reported it, as handed to the
/// application error callback.
#[derive(Debug)]
pub struct ErrorInfo {
    pub error: Error,
    pub file: &'static str,
    pub module: &'static str,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}:{}:{}, in {})",
            self.error, self.file, self.line, self.column, self.module
        )
    }
}

// Captures the report site along with the error, so diagnostic callbacks can
// point back into the engine.
macro_rules! error_info {
    ($err:expr) => {
        $crate::error::ErrorInfo {
            error: $err.into(),
            file: file!(),
            module: module_path!(),
            line: line!(),
            column: column!(),
        }
    };
}

pub(crate) use error_info;
