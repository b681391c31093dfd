// SPDX-License-Identifier: GPL-3.0-only

//! Frame codec (C1): the 8-byte header plus body, read and written as one unit.

use std::io::{Read, Write};

use crate::errors::{StreamError, StreamResult};
use crate::protocol::MessageKind;

/// A decoded frame: a message kind and its (possibly empty) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub body: Vec<u8>,
}

/// Writes a single frame: an 8-byte little-endian header, then `body`.
///
/// Both writes are checked for an exact byte count; a short write is treated
/// as fatal and surfaces as [`StreamError::Transport`].
pub fn write_frame<W: Write>(writer: &mut W, kind: u32, body: &[u8]) -> StreamResult<()> {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&kind.to_le_bytes());
    header[4..8].copy_from_slice(&(body.len() as u32).to_le_bytes());

    writer
        .write_all(&header)
        .map_err(|e| StreamError::Transport(format!("short write of frame header: {}", e)))?;
    if !body.is_empty() {
        writer
            .write_all(body)
            .map_err(|e| StreamError::Transport(format!("short write of frame body: {}", e)))?;
    }
    Ok(())
}

pub fn write_frame_kind<W: Write>(writer: &mut W, kind: MessageKind, body: &[u8]) -> StreamResult<()> {
    write_frame(writer, kind.as_u32(), body)
}

/// The largest body this codec will allocate for, regardless of what a peer
/// claims in the length header. Comfortably above the largest real frame
/// (an uncompressed 4K YUYV image is ~16.6 MiB) while still rejecting a
/// hostile or corrupt length field before it can force a multi-gigabyte
/// allocation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Reads a single frame, blocking until the header and body are fully read.
///
/// A zero-byte read at the start of the header (or between the header and the
/// body) means the peer closed the connection in an orderly way and is
/// reported as [`StreamError::PeerClosed`], not logged as an error upstream.
pub fn read_frame<R: Read>(reader: &mut R) -> StreamResult<Frame> {
    let mut header = [0u8; 8];
    read_exact_or_peer_closed(reader, &mut header)?;

    let kind = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let length = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;

    if length > MAX_FRAME_LEN {
        return Err(StreamError::Protocol(format!(
            "frame body length {} exceeds the {}-byte limit",
            length, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; length];
    if length > 0 {
        read_exact_or_peer_closed(reader, &mut body)?;
    }

    Ok(Frame { kind, body })
}

/// Like `Read::read_exact`, but treats an immediate EOF (zero bytes read
/// before any progress) as `PeerClosed` rather than a transport failure, and
/// a partial read followed by EOF as a transport failure (the peer vanished
/// mid-message, which is not an orderly close).
fn read_exact_or_peer_closed<R: Read>(reader: &mut R, buf: &mut [u8]) -> StreamResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(StreamError::PeerClosed),
            Ok(0) => {
                return Err(StreamError::Transport(
                    "peer disconnected mid-message".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Transport(e.to_string())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 42, b"hello").unwrap();

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(frame.kind, 42);
        assert_eq!(frame.body, b"hello");
    }

    #[test]
    fn empty_body_round_trips_to_an_empty_vec() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 7, &[]).unwrap();

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(frame.kind, 7);
        assert!(frame.body.is_empty());
    }

    #[test]
    fn read_on_empty_stream_is_peer_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(err.is_peer_closed());
    }

    #[test]
    fn read_with_truncated_body_is_a_transport_error() {
        let mut header = Vec::new();
        header.extend_from_slice(&10u32.to_le_bytes());
        header.extend_from_slice(&100u32.to_le_bytes()); // claims 100 bytes of body
        header.extend_from_slice(b"short"); // far fewer actually follow

        let mut cursor = Cursor::new(header);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(!err.is_peer_closed());
        assert!(matches!(err, StreamError::Transport(_)));
    }

    #[test]
    fn a_claimed_length_over_the_limit_is_rejected_without_allocating() {
        let mut header = Vec::new();
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());

        let mut cursor = Cursor::new(header);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn two_frames_written_back_to_back_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1, b"first").unwrap();
        write_frame(&mut buf, 2, b"second").unwrap();

        let mut cursor = Cursor::new(buf);
        let a = read_frame(&mut cursor).unwrap();
        let b = read_frame(&mut cursor).unwrap();
        assert_eq!((a.kind, a.body), (1, b"first".to_vec()));
        assert_eq!((b.kind, b.body), (2, b"second".to_vec()));
    }
}
