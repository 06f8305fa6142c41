//! Wire format of the dealer/worker command protocol.
//!
//! Every message is either a single command byte or a payload of hex-encoded
//! field elements separated by `|`. The number and order of segments is fixed
//! by the receiver's expectation for the command being served.

use arithmpc_common::field::{self, FieldCodecError, Fp};
use thiserror::Error;

/// Error type for command and payload parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),
    #[error("expected a single command byte, got a frame of {0} bytes")]
    NotACommand(usize),
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("expected {expected} payload segments, got {got}")]
    SegmentCount { expected: usize, got: usize },
    #[error("expected paired value and MAC segments, got {0} segments")]
    UnpairedMacSegments(usize),
    #[error("payload segment does not decode: {0}")]
    Decode(#[from] FieldCodecError),
}

/// One-byte control codes of the dealer-driven protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    SendShares = 0,
    Success = 1,
    Shutdown = 2,
    Addition = 3,
    Multiplication = 4,
    FetchMultShare = 5,
}

impl Command {
    pub fn from_byte(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(Command::SendShares),
            1 => Ok(Command::Success),
            2 => Ok(Command::Shutdown),
            3 => Ok(Command::Addition),
            4 => Ok(Command::Multiplication),
            5 => Ok(Command::FetchMultShare),
            other => Err(WireError::UnknownCommand(other)),
        }
    }

    /// Parses a whole frame as a command; anything but a single known byte
    /// is rejected.
    pub fn from_frame(frame: &[u8]) -> Result<Self, WireError> {
        match frame {
            [byte] => Self::from_byte(*byte),
            _ => Err(WireError::NotACommand(frame.len())),
        }
    }

    pub fn to_frame(self) -> Vec<u8> {
        vec![self as u8]
    }
}

/// Encodes field elements as a pipe-delimited uppercase hex payload.
pub fn encode_elements(elements: &[Fp]) -> Vec<u8> {
    elements
        .iter()
        .map(field::to_hex)
        .collect::<Vec<_>>()
        .join("|")
        .into_bytes()
}

/// Decodes a pipe-delimited hex payload into field elements.
pub fn decode_elements(payload: &[u8]) -> Result<Vec<Fp>, WireError> {
    let text = std::str::from_utf8(payload).map_err(|_| WireError::NotUtf8)?;
    text.split('|')
        .map(|segment| field::from_hex(segment).map_err(WireError::from))
        .collect()
}

/// Decodes a payload and checks it carries exactly `expected` elements.
pub fn decode_exact(payload: &[u8], expected: usize) -> Result<Vec<Fp>, WireError> {
    let elements = decode_elements(payload)?;
    if elements.len() != expected {
        return Err(WireError::SegmentCount {
            expected,
            got: elements.len(),
        });
    }
    Ok(elements)
}
