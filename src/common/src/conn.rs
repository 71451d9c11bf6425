use std::io;
use std::io::{Read, Write};

use crate::error::ProtocolError;
use crate::messages::{Message, Packet};

/// Largest JSON header accepted from a peer.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Largest binary payload accepted from a peer.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Length-prefixed framing over any byte stream.
///
/// Every block is a big-endian `u32` length followed by that many bytes. A
/// header block holds one JSON `Message`; `frame` headers are followed by a
/// second block with the JPEG bytes.
pub trait MessageStream {
    /// Write a header-only message.
    fn write_msg(&mut self, message: &Message) -> Result<usize, ProtocolError>;

    /// Write a packet (header plus payload for frames) as one buffer.
    fn write_packet(&mut self, packet: &Packet) -> Result<usize, ProtocolError>;

    /// Read one header block. Any payload that follows is left unread.
    fn read_msg(&mut self) -> Result<Message, ProtocolError>;

    /// Read one header block and, for frames, its payload.
    fn read_packet(&mut self) -> Result<Packet, ProtocolError>;
}

impl<S: Read + Write> MessageStream for S {
    fn write_msg(&mut self, message: &Message) -> Result<usize, ProtocolError> {
        if message.has_payload() {
            return Err(ProtocolError::Unexpected(format!(
                "{} header written without its payload",
                message.kind()
            )));
        }
        self.write_packet(&Packet::new(message.clone()))
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<usize, ProtocolError> {
        let data = packet.to_bytes()?;
        self.write_all(&data)?;
        self.flush()?;
        Ok(data.len())
    }

    fn read_msg(&mut self) -> Result<Message, ProtocolError> {
        let body = read_block(self, "header", MAX_HEADER_SIZE)?;
        Ok(serde_json::from_slice::<Message>(&body)?)
    }

    fn read_packet(&mut self) -> Result<Packet, ProtocolError> {
        let message = self.read_msg()?;
        let payload = if message.has_payload() {
            Some(read_block(self, "payload", MAX_PAYLOAD_SIZE)?)
        } else {
            None
        };
        Ok(Packet { message, payload })
    }
}

/// Read a length prefix and then exactly that many bytes.
///
/// `read_exact` keeps reading across partial TCP segments; running out of
/// bytes before the declared length means the peer went away.
fn read_block<R: Read + ?Sized>(
    reader: &mut R,
    kind: &'static str,
    limit: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).map_err(eof_as_closed)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > limit {
        return Err(ProtocolError::TooLarge {
            kind,
            size: len,
            limit,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(eof_as_closed)?;
    Ok(buf)
}

fn eof_as_closed(e: io::Error) -> ProtocolError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Closed
    } else {
        ProtocolError::Io(e)
    }
}
