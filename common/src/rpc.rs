//! Improv-style RPC framing: `[command][payload_len][payload][checksum]`.
//!
//! The checksum is the low byte of the sum of every byte before it. This
//! layout is shared with the provisioning client apps and must stay
//! byte-exact.

use thiserror::Error;

use crate::types::CredentialRecord;

pub const FRAME_OVERHEAD: usize = 3;
pub const MAX_FRAME_LEN: usize = 255;
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - FRAME_OVERHEAD;

pub const CMD_SET_WIFI_CREDENTIALS: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("declared payload length {0} exceeds the maximum frame size")]
    Oversized(usize),
    #[error("declared payload length {declared} does not match frame length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("checksum mismatch: provided {provided:#04x}, expected {expected:#04x}")]
    Checksum { provided: u8, expected: u8 },
    #[error("{0} length field overruns the payload")]
    FieldOverrun(&'static str),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("ssid is empty")]
    EmptySsid,
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub command: u8,
    pub payload: &'a [u8],
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Validates one complete frame. `bytes` must hold exactly one frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(FrameError::TooShort(bytes.len()));
    }

    let declared = bytes[1] as usize;
    if declared + FRAME_OVERHEAD != bytes.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let (body, tail) = bytes.split_at(bytes.len() - 1);
    let provided = tail[0];
    let expected = checksum(body);
    if provided != expected {
        return Err(FrameError::Checksum { provided, expected });
    }

    Ok(Frame {
        command: body[0],
        payload: &body[2..],
    })
}

pub fn encode_frame(command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.push(command);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    Ok(frame)
}

/// Parses `[ssid_len][ssid][password_len][password]`.
pub fn decode_credentials(payload: &[u8]) -> Result<CredentialRecord, FrameError> {
    let (ssid, rest) = take_field(payload, "ssid")?;
    let (password, _) = take_field(rest, "password")?;

    let ssid = std::str::from_utf8(ssid).map_err(|_| FrameError::InvalidUtf8("ssid"))?;
    let password =
        std::str::from_utf8(password).map_err(|_| FrameError::InvalidUtf8("password"))?;

    if ssid.is_empty() {
        return Err(FrameError::EmptySsid);
    }

    Ok(CredentialRecord {
        ssid: ssid.to_string(),
        password: password.to_string(),
    })
}

pub fn encode_credentials(ssid: &str, password: &str) -> Result<Vec<u8>, FrameError> {
    let total = ssid.len() + password.len() + 2;
    if ssid.len() > u8::MAX as usize || password.len() > u8::MAX as usize || total > MAX_PAYLOAD_LEN
    {
        return Err(FrameError::PayloadTooLarge(total));
    }

    let mut payload = Vec::with_capacity(total);
    payload.push(ssid.len() as u8);
    payload.extend_from_slice(ssid.as_bytes());
    payload.push(password.len() as u8);
    payload.extend_from_slice(password.as_bytes());
    Ok(payload)
}

fn take_field<'a>(
    bytes: &'a [u8],
    field: &'static str,
) -> Result<(&'a [u8], &'a [u8]), FrameError> {
    let (&len, rest) = bytes.split_first().ok_or(FrameError::FieldOverrun(field))?;
    let len = len as usize;
    if len > rest.len() {
        return Err(FrameError::FieldOverrun(field));
    }
    Ok(rest.split_at(len))
}

/// Reassembles frames from chunks of a fragmenting transport.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Returns the next complete frame, `None` while more bytes are needed.
    /// A declared length that cannot fit a frame clears the whole buffer.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, FrameError>> {
        if self.buffer.len() < FRAME_OVERHEAD {
            return None;
        }

        let declared = self.buffer[1] as usize;
        let expected = declared + FRAME_OVERHEAD;
        if expected > MAX_FRAME_LEN {
            self.buffer.clear();
            return Some(Err(FrameError::Oversized(declared)));
        }

        if self.buffer.len() < expected {
            return None;
        }

        Some(Ok(self.buffer.drain(..expected).collect()))
    }
}
