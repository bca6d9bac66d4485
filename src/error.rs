//! Error types.

use std::io::{self, ErrorKind};

use crate::{
    device::{Direction, TransferStatus},
    options::{Parity, StopBits},
};

/// Serial port result.
pub type Result<T> = std::result::Result<T, Error>;

/// Serial port error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial options are invalid.
    #[error("invalid serial options: {0}")]
    Validation(#[from] ValidationError),
    /// Device has no interface of the required class.
    #[error("no interface with class {class:#04x} found")]
    InterfaceNotFound { class: u8 },
    /// Interface has no endpoint of the required direction.
    #[error("interface {interface} has no {direction} endpoint")]
    EndpointNotFound { interface: u8, direction: Direction },
    /// Device reported a non-successful transfer status.
    #[error("USB transfer failed: {0}")]
    Transfer(TransferStatus),
    /// Device-access layer failed.
    #[error("USB transport error: {0}")]
    Transport(#[from] io::Error),
    /// Opening the port failed; the device has been closed.
    #[error("error setting up device: {0}")]
    Setup(#[source] Box<Error>),
    /// Line coding read back from the device is too short.
    #[error("line coding of {0} bytes is too short")]
    ShortLineCoding(usize),
    /// Port is not open.
    #[error("serial port is not open")]
    NotOpen,
    /// Stream failed earlier and must be reacquired from the port.
    #[error("stream has errored")]
    StreamErrored,
    /// Stream was aborted by closing the port.
    #[error("stream was aborted")]
    Aborted,
}

impl Error {
    /// Wraps an error that occurred while opening the port.
    pub(crate) fn setup(err: Error) -> Self {
        match err {
            err @ Self::Setup(_) => err,
            err => Self::Setup(Box::new(err)),
        }
    }
}

/// Invalid serial option.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid baud rate {0}")]
    BaudRate(String),
    #[error("invalid data bits {0}")]
    DataBits(u8),
    #[error("invalid stop bits {0}")]
    StopBits(StopBits),
    #[error("invalid parity {0}")]
    Parity(Parity),
    #[error("invalid buffer size {0}")]
    BufferSize(usize),
    #[error("malformed serial options {0:?}")]
    Format(String),
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Validation(_) => ErrorKind::InvalidInput,
            Error::InterfaceNotFound { .. } | Error::EndpointNotFound { .. } => ErrorKind::NotFound,
            Error::Transfer(TransferStatus::Stall) => ErrorKind::BrokenPipe,
            Error::Transfer(_) => ErrorKind::ConnectionAborted,
            Error::Transport(err) => err.kind(),
            Error::Setup(_) => ErrorKind::Other,
            Error::ShortLineCoding(_) => ErrorKind::InvalidData,
            Error::NotOpen => ErrorKind::NotConnected,
            Error::StreamErrored => ErrorKind::BrokenPipe,
            Error::Aborted => ErrorKind::ConnectionAborted,
        };

        match error {
            Error::Transport(err) => err,
            error => io::Error::new(kind, error),
        }
    }
}
