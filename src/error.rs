use crate::close::CloseCode;
use crate::connection::ConnectionState;
use std::io;
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
    Timeout {
        #[from]
        source: Elapsed,
    },

    // Framing Errors
    #[error("frame payload of {0} bytes does not fit the {1}-byte receive buffer")]
    BufferOverflow(usize, usize),

    #[error("frame declares a payload length outside the unsigned 63-bit range")]
    PayloadLengthOutOfRange,

    #[error("stream ended in the middle of a frame")]
    UnexpectedEnd,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    // Connection Errors
    #[error("operation cancelled")]
    Cancelled,

    #[error("connection is {0:?}, the operation needs it open")]
    InvalidState(ConnectionState),

    #[error("close frames are sent through close, not send")]
    CloseViaSend,

    #[error("channel communication error")]
    CommunicationError,
}

impl Error {
    /// Close status to report to the peer when this failure kills the
    /// inbound stream.
    pub(crate) fn close_code(&self) -> CloseCode {
        match self {
            Error::BufferOverflow(..) => CloseCode::MessageTooBig,
            Error::PayloadLengthOutOfRange
            | Error::InvalidOpcode
            | Error::RSVNotZero
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize => CloseCode::ProtocolError,
            Error::UnexpectedEnd => CloseCode::InvalidPayloadData,
            Error::Cancelled => CloseCode::EndpointUnavailable,
            _ => CloseCode::InternalServerError,
        }
    }

    /// Short reason phrase that pairs with [`Error::close_code`].
    pub(crate) fn close_reason(&self) -> &'static str {
        match self {
            Error::BufferOverflow(..) => "frame too large for receive buffer",
            Error::PayloadLengthOutOfRange => "payload length out of range",
            Error::UnexpectedEnd => "stream ended mid-frame",
            Error::InvalidOpcode => "invalid opcode",
            Error::RSVNotZero | Error::ControlFramesFragmented | Error::ControlFramePayloadSize => {
                "protocol violation"
            }
            Error::Cancelled => "connection cancelled",
            _ => "internal failure",
        }
    }
}
