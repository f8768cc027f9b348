//! ISO 7816-4 command/response framing.

use crate::constants::{
    APP_ID, CLA, INS_CBOR, INS_SELECT, MAX_EXTENDED_DATA, MAX_SHORT_DATA, P1_SELECT_BY_NAME,
    SW_SUCCESS,
};

/// Error variants that can occur while framing or unframing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Payload does not fit in an extended APDU.
    TooLong(usize),
    /// Frame is shorter than its header or declared length.
    Truncated(usize),
    /// Card answered with a status word other than 90 00.
    Status(u16),
    /// Command frame carries an instruction other than the CBOR command.
    UnsupportedInstruction(u8),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TooLong(len) => write!(f, "payload of {len} bytes does not fit in a frame"),
            Error::Truncated(len) => write!(f, "truncated frame of {len} bytes"),
            Error::Status(sw) => write!(f, "card returned status word {sw:04X}"),
            Error::UnsupportedInstruction(ins) => write!(f, "unsupported instruction {ins:02X}"),
        }
    }
}

impl std::error::Error for Error {}

fn wrap(ins: u8, p1: u8, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut frame = Vec::with_capacity(4 + 3 + data.len());
    frame.extend([CLA, ins, p1, 0x00]);

    match data.len() {
        0 => {}
        len if len <= MAX_SHORT_DATA => frame.push(len as u8),
        len if len <= MAX_EXTENDED_DATA => {
            frame.push(0x00);
            frame.extend((len as u16).to_be_bytes());
        }
        len => return Err(Error::TooLong(len)),
    }

    frame.extend(data);
    Ok(frame)
}

/// Wraps a CBOR payload into a command frame.
pub fn command(payload: &[u8]) -> Result<Vec<u8>, Error> {
    wrap(INS_CBOR, 0x00, payload)
}

/// Builds the SELECT-by-name frame for the tap card application.
pub fn select() -> Vec<u8> {
    let mut frame = vec![CLA, INS_SELECT, P1_SELECT_BY_NAME, 0x00, APP_ID.len() as u8];
    frame.extend(APP_ID);
    frame
}

/// Checks the trailing status word and returns the response data.
pub fn unwrap(frame: &[u8]) -> Result<&[u8], Error> {
    if frame.len() < 2 {
        return Err(Error::Truncated(frame.len()));
    }

    let (data, sw) = frame.split_at(frame.len() - 2);
    let sw = u16::from_be_bytes([sw[0], sw[1]]);

    if sw != SW_SUCCESS {
        return Err(Error::Status(sw));
    }

    Ok(data)
}

/// Extracts the CBOR payload from a command frame built by [`command`].
pub fn payload(frame: &[u8]) -> Result<&[u8], Error> {
    if frame.len() < 4 {
        return Err(Error::Truncated(frame.len()));
    }
    if frame[1] != INS_CBOR {
        return Err(Error::UnsupportedInstruction(frame[1]));
    }

    let body = &frame[4..];
    let (len, data) = match body {
        [] => (0, body),
        [0x00, hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, rest),
        [len, rest @ ..] => (*len as usize, rest),
    };

    data.get(..len).ok_or(Error::Truncated(frame.len()))
}

/// Appends the success status word to response data.
pub fn response(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 2);
    frame.extend(data);
    frame.extend(SW_SUCCESS.to_be_bytes());
    frame
}
