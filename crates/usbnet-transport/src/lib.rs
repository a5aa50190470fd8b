// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Blocking, length-delimited framing over a byte-stream socket (C3).
//!
//! Frames are atomic from the application's point of view: either the full
//! opcode-plus-payload arrives, or [`TransportError::Truncated`] is
//! returned and nothing is delivered.

pub mod error;

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

pub use error::TransportError;
use usbnet_wire::length::{pack_length, unpack_length};

/// Maximum length-field form (`0x84` + 4 bytes): the most header bytes any
/// frame can need beyond the opcode byte itself.
const MAX_LENGTH_HEADER: usize = 5;

/// Write a complete frame: `opcode`, the packed length of `payload`, then
/// `payload` itself. Retries on partial writes; only a genuine IO error
/// aborts the send.
pub fn send_frame<W: Write>(w: &mut W, opcode: u8, payload: &[u8]) -> Result<(), TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| usbnet_wire::WireError::EncodingLimit)?;
    let mut header = Vec::with_capacity(1 + MAX_LENGTH_HEADER);
    header.push(opcode);
    header.extend_from_slice(&pack_length(len)?);

    write_all_retrying(w, &header)?;
    write_all_retrying(w, payload)?;
    Ok(())
}

fn write_all_retrying<W: Write>(w: &mut W, mut buf: &[u8]) -> Result<(), TransportError> {
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => return Err(TransportError::Io(io::Error::from(io::ErrorKind::WriteZero))),
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::from(e)),
        }
    }
    Ok(())
}

/// Read exactly one complete frame: two bytes (opcode + length lead byte),
/// any further length bytes the lead byte implies, then exactly that many
/// payload bytes. No data is delivered until the whole frame is in hand.
pub fn recv_frame<R: Read>(r: &mut R) -> Result<(u8, Vec<u8>), TransportError> {
    let mut head = [0u8; 2];
    r.read_exact(&mut head)?;
    let opcode = head[0];
    let lead = head[1];

    // `unpack_length` only needs to know how many *more* bytes the long
    // forms require; read those before decoding the value.
    let mut len_buf = vec![lead];
    match lead {
        0x82 => {
            let mut rest = [0u8; 2];
            r.read_exact(&mut rest)?;
            len_buf.extend_from_slice(&rest);
        }
        0x84 => {
            let mut rest = [0u8; 4];
            r.read_exact(&mut rest)?;
            len_buf.extend_from_slice(&rest);
        }
        _ => {}
    }
    let (payload_len, _) = unpack_length(&len_buf)?;

    let mut payload = vec![0u8; payload_len as usize];
    r.read_exact(&mut payload)?;
    Ok((opcode, payload))
}

/// A transport bound to one byte-stream connection, for callers that want
/// to carry the stream around rather than thread it through every call.
pub struct Transport<S> {
    stream: S,
}

impl<S: Read + Write> Transport<S> {
    pub fn new(stream: S) -> Transport<S> {
        Transport { stream }
    }

    pub fn send(&mut self, opcode: u8, payload: &[u8]) -> Result<(), TransportError> {
        send_frame(&mut self.stream, opcode, payload)
    }

    pub fn recv(&mut self) -> Result<(u8, Vec<u8>), TransportError> {
        recv_frame(&mut self.stream)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Disable Nagle's algorithm on a connected TCP socket so small RPC frames
/// ship immediately, rather than waiting to coalesce with a future write.
///
/// Grounded on the same `libc::setsockopt` pattern used to tune
/// `SO_SNDBUF`/`SO_RCVBUF` in `flux-network`'s TCP stream: raw socket
/// tuning that `std::net::TcpStream::set_nodelay` already exposes safely,
/// used here directly so the same helper also applies to a raw fd
/// retrieved via the session hand-off (`usbnet-handoff`), which has no
/// `TcpStream` to call `set_nodelay` on.
pub fn disable_nagle_fd(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let flag: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &flag as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn disable_nagle(stream: &TcpStream) -> io::Result<()> {
    disable_nagle_fd(stream.as_raw_fd())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_frame_round_trips() {
        let mut buf = Vec::new();
        send_frame(&mut buf, 0x33, b"hello").unwrap();
        let (opcode, payload) = recv_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(opcode, 0x33);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn empty_payload_frame_round_trips() {
        let mut buf = Vec::new();
        send_frame(&mut buf, 0x31, &[]).unwrap();
        let (opcode, payload) = recv_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(opcode, 0x31);
        assert!(payload.is_empty());
    }

    #[test]
    fn long_form_payload_round_trips() {
        let payload = vec![0xABu8; 0x10000];
        let mut buf = Vec::new();
        send_frame(&mut buf, 0x40, &payload).unwrap();
        let (opcode, decoded) = recv_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(opcode, 0x40);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn truncated_frame_never_delivers_partial_data() {
        let mut buf = Vec::new();
        send_frame(&mut buf, 0x33, b"hello!").unwrap();
        buf.truncate(buf.len() - 3);
        let err = recv_frame(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, TransportError::Truncated));
    }

    #[test]
    fn transport_wraps_a_duplex_cursor_pair() {
        struct DuplexBuf {
            inbound: Cursor<Vec<u8>>,
            outbound: Vec<u8>,
        }
        impl Read for DuplexBuf {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.inbound.read(buf)
            }
        }
        impl Write for DuplexBuf {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.outbound.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut wire = Vec::new();
        send_frame(&mut wire, 0x31, &[]).unwrap();
        let mut transport = Transport::new(DuplexBuf {
            inbound: Cursor::new(wire),
            outbound: Vec::new(),
        });
        let (opcode, payload) = transport.recv().unwrap();
        assert_eq!(opcode, 0x31);
        assert!(payload.is_empty());

        transport.send(0x36, &[7]).unwrap();
        assert_eq!(transport.get_ref().outbound, vec![0x36, 1, 7]);
    }
}
