//! Gearman binary protocol framing plus the line-based admin protocol.

pub mod codec;
pub mod packet;

pub use codec::{Frame, GearmanCodec};
pub use packet::{Magic, Packet, PacketType, HEADER_LEN};
