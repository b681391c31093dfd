// SPDX-License-Identifier: GPL-3.0-only

//! The closed catalog of message kinds and the `ImageSpec` body shape (C9).
//!
//! Ordinals are fixed at the values declared by the system this protocol was
//! distilled from, so the wire format stays bit-compatible with it.

use crate::errors::StreamError;

/// A message kind on the wire. Both client and server must agree on these ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    InvalidMsg = 0,
    TerminatingConnection = 1,
    GetWebcamStatus = 2,
    GetWebcamList = 3,
    OpenWebcam = 4,
    CloseWebcam = 5,
    GetStreamStatus = 6,
    GetCurrentSpec = 7,
    GetSupportedSpecs = 8,
    SetCurrentSpec = 9,
    StartStream = 10,
    StopStream = 11,
    Frame = 12,
    ImageSpec = 13,
    StreamIsStarted = 14,
    StreamIsStopped = 15,
    SupportedSpecs = 16,
    WebcamIsClosed = 17,
    WebcamIsOpened = 18,
    WebcamList = 19,
    InvalidSpec = 20,
    NoWebcamOpened = 21,
    RuntimeError = 22,
    WebcamUnavailable = 23,
}

impl MessageKind {
    /// All kinds in ordinal order, for handler-table construction and display.
    pub const ALL: [MessageKind; 24] = [
        MessageKind::InvalidMsg,
        MessageKind::TerminatingConnection,
        MessageKind::GetWebcamStatus,
        MessageKind::GetWebcamList,
        MessageKind::OpenWebcam,
        MessageKind::CloseWebcam,
        MessageKind::GetStreamStatus,
        MessageKind::GetCurrentSpec,
        MessageKind::GetSupportedSpecs,
        MessageKind::SetCurrentSpec,
        MessageKind::StartStream,
        MessageKind::StopStream,
        MessageKind::Frame,
        MessageKind::ImageSpec,
        MessageKind::StreamIsStarted,
        MessageKind::StreamIsStopped,
        MessageKind::SupportedSpecs,
        MessageKind::WebcamIsClosed,
        MessageKind::WebcamIsOpened,
        MessageKind::WebcamList,
        MessageKind::InvalidSpec,
        MessageKind::NoWebcamOpened,
        MessageKind::RuntimeError,
        MessageKind::WebcamUnavailable,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Maps a raw wire ordinal back to a known kind, if any.
    pub fn from_u32(value: u32) -> Option<MessageKind> {
        MessageKind::ALL.into_iter().find(|k| k.as_u32() == value)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::InvalidMsg => "INVALID_MSG",
            MessageKind::TerminatingConnection => "TERMINATING_CONNECTION",
            MessageKind::GetWebcamStatus => "GET_WEBCAM_STATUS",
            MessageKind::GetWebcamList => "GET_WEBCAM_LIST",
            MessageKind::OpenWebcam => "OPEN_WEBCAM",
            MessageKind::CloseWebcam => "CLOSE_WEBCAM",
            MessageKind::GetStreamStatus => "GET_STREAM_STATUS",
            MessageKind::GetCurrentSpec => "GET_CURRENT_SPEC",
            MessageKind::GetSupportedSpecs => "GET_SUPPORTED_SPECS",
            MessageKind::SetCurrentSpec => "SET_CURRENT_SPEC",
            MessageKind::StartStream => "START_STREAM",
            MessageKind::StopStream => "STOP_STREAM",
            MessageKind::Frame => "FRAME",
            MessageKind::ImageSpec => "IMAGE_SPEC",
            MessageKind::StreamIsStarted => "STREAM_IS_STARTED",
            MessageKind::StreamIsStopped => "STREAM_IS_STOPPED",
            MessageKind::SupportedSpecs => "SUPPORTED_SPECS",
            MessageKind::WebcamIsClosed => "WEBCAM_IS_CLOSED",
            MessageKind::WebcamIsOpened => "WEBCAM_IS_OPENED",
            MessageKind::WebcamList => "WEBCAM_LIST",
            MessageKind::InvalidSpec => "INVALID_SPEC",
            MessageKind::NoWebcamOpened => "NO_WEBCAM_OPENED",
            MessageKind::RuntimeError => "RUNTIME_ERROR",
            MessageKind::WebcamUnavailable => "WEBCAM_UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// A camera resolution and pixel format triple, exactly 12 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    pub fmt: u32,
}

impl ImageSpec {
    pub const WIRE_LEN: usize = 12;

    pub fn new(width: u32, height: u32, fmt: u32) -> Self {
        Self { width, height, fmt }
    }

    pub fn to_bytes(self) -> [u8; Self::WIRE_LEN] {
        let mut buf = [0u8; Self::WIRE_LEN];
        buf[0..4].copy_from_slice(&self.width.to_le_bytes());
        buf[4..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..12].copy_from_slice(&self.fmt.to_le_bytes());
        buf
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, StreamError> {
        if body.len() != Self::WIRE_LEN {
            return Err(StreamError::Protocol(format!(
                "expected a {}-byte ImageSpec, got {} bytes",
                Self::WIRE_LEN,
                body.len()
            )));
        }
        let width = u32::from_le_bytes(body[0..4].try_into().unwrap());
        let height = u32::from_le_bytes(body[4..8].try_into().unwrap());
        let fmt = u32::from_le_bytes(body[8..12].try_into().unwrap());
        Ok(Self { width, height, fmt })
    }

    /// Encodes a list of specs as the `SUPPORTED_SPECS` body (N × 12 bytes).
    pub fn encode_many(specs: &[ImageSpec]) -> Vec<u8> {
        let mut out = Vec::with_capacity(specs.len() * Self::WIRE_LEN);
        for spec in specs {
            out.extend_from_slice(&spec.to_bytes());
        }
        out
    }

    /// Decodes a `SUPPORTED_SPECS` body, rejecting any length not a multiple of 12.
    pub fn decode_many(body: &[u8]) -> Result<Vec<ImageSpec>, StreamError> {
        if body.len() % Self::WIRE_LEN != 0 {
            return Err(StreamError::Protocol(format!(
                "SUPPORTED_SPECS body length {} is not a multiple of {}",
                body.len(),
                Self::WIRE_LEN
            )));
        }
        body.chunks_exact(Self::WIRE_LEN)
            .map(ImageSpec::from_bytes)
            .collect()
    }
}
