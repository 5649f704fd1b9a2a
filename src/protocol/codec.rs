use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{GearmanError, Result};
use crate::protocol::packet::{Magic, Packet, PacketType, HEADER_LEN};

/// Largest payload accepted from a peer.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Longest admin command line accepted before the newline.
pub const MAX_ADMIN_LINE: usize = 4096;

/// Either a binary packet or a line of the text admin protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Packet(Packet),
    Admin(String),
}

/// Frames binary packets by their 12-byte header. A frame that does not
/// start with a NUL byte is read as one newline-terminated admin line.
#[derive(Debug, Default, Clone, Copy)]
pub struct GearmanCodec;

impl GearmanCodec {
    pub fn new() -> Self {
        Self
    }

    fn decode_admin(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_ADMIN_LINE {
                return Err(GearmanError::Protocol("admin line too long".to_string()));
            }
            return Ok(None);
        };

        let line = src.split_to(newline + 1);
        let text = String::from_utf8_lossy(&line[..newline]);
        Ok(Some(Frame::Admin(text.trim_end_matches('\r').trim().to_string())))
    }
}

impl Decoder for GearmanCodec {
    type Item = Frame;
    type Error = GearmanError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != 0 {
            return self.decode_admin(src);
        }
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = Magic::from_bytes(&src[0..4])
            .ok_or_else(|| GearmanError::Protocol("bad packet magic".to_string()))?;
        let code = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;

        let kind = PacketType::from_code(code)
            .ok_or_else(|| GearmanError::Protocol(format!("unknown packet type {}", code)))?;
        if len > MAX_PAYLOAD_LEN {
            return Err(GearmanError::Protocol(format!(
                "payload of {} bytes exceeds limit",
                len
            )));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        let args = Packet::decode_args(kind, payload)?;
        Ok(Some(Frame::Packet(Packet { magic, kind, args })))
    }
}

impl Encoder<Frame> for GearmanCodec {
    type Error = GearmanError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match frame {
            Frame::Packet(packet) => packet.encode(dst),
            Frame::Admin(text) => {
                dst.extend_from_slice(text.as_bytes());
                Ok(())
            }
        }
    }
}

impl Encoder<Packet> for GearmanCodec {
    type Error = GearmanError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        packet.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn encoded(packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn decodes_full_packet() {
        let packet = Packet::request(PacketType::SubmitJob, ["reverse", "u1", "hello"]);
        let mut buf = encoded(&packet);
        let frame = GearmanCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Packet(packet));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_partial_header_and_payload() {
        let packet = Packet::request(PacketType::EchoReq, ["ping"]);
        let full = encoded(&packet);
        let mut codec = GearmanCodec::new();

        let mut buf = BytesMut::from(&full[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[6..14]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[14..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Packet(packet))
        );
    }

    #[test]
    fn decodes_back_to_back_packets() {
        let a = Packet::request(PacketType::GrabJob, Vec::<&'static str>::new());
        let b = Packet::request(PacketType::PreSleep, Vec::<&'static str>::new());
        let mut buf = encoded(&a);
        buf.extend_from_slice(&encoded(&b));

        let mut codec = GearmanCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Packet(a)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Packet(b)));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_type() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"\0REQ");
        buf.put_u32(99);
        buf.put_u32(0);
        assert!(GearmanCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"\0XYZ");
        buf.put_u32(1);
        buf.put_u32(0);
        assert!(GearmanCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn decodes_admin_lines() {
        let mut buf = BytesMut::from(&b"status\r\nworkers\n"[..]);
        let mut codec = GearmanCodec::new();
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Admin("status".to_string()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Admin("workers".to_string()))
        );
    }

    #[test]
    fn partial_admin_line_waits() {
        let mut buf = BytesMut::from(&b"stat"[..]);
        assert!(GearmanCodec.decode(&mut buf).unwrap().is_none());
    }
}
