use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{GearmanError, Result};

pub const HEADER_LEN: usize = 12;

pub const REQ_MAGIC: [u8; 4] = *b"\0REQ";
pub const RES_MAGIC: [u8; 4] = *b"\0RES";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Req,
    Res,
}

impl Magic {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"\0REQ" => Some(Magic::Req),
            b"\0RES" => Some(Magic::Res),
            _ => None,
        }
    }

    pub fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Magic::Req => &REQ_MAGIC,
            Magic::Res => &RES_MAGIC,
        }
    }
}

macro_rules! packet_types {
    ($($name:ident = $code:literal, $args:literal;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PacketType {
            $($name,)*
        }

        impl PacketType {
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(PacketType::$name),)*
                    _ => None,
                }
            }

            pub fn code(self) -> u32 {
                match self {
                    $(PacketType::$name => $code,)*
                }
            }

            /// Number of NUL-separated fields in the payload.
            pub fn arg_count(self) -> usize {
                match self {
                    $(PacketType::$name => $args,)*
                }
            }
        }
    };
}

packet_types! {
    CanDo = 1, 1;
    CantDo = 2, 1;
    ResetAbilities = 3, 0;
    PreSleep = 4, 0;
    Noop = 6, 0;
    SubmitJob = 7, 3;
    JobCreated = 8, 1;
    GrabJob = 9, 0;
    NoJob = 10, 0;
    JobAssign = 11, 3;
    WorkStatus = 12, 3;
    WorkComplete = 13, 2;
    WorkFail = 14, 1;
    GetStatus = 15, 1;
    EchoReq = 16, 1;
    EchoRes = 17, 1;
    SubmitJobBg = 18, 3;
    Error = 19, 2;
    StatusRes = 20, 5;
    SubmitJobHigh = 21, 3;
    SetClientId = 22, 1;
    CanDoTimeout = 23, 2;
    AllYours = 24, 0;
    WorkException = 25, 2;
    OptionReq = 26, 1;
    OptionRes = 27, 1;
    WorkData = 28, 2;
    WorkWarning = 29, 2;
    GrabJobUniq = 30, 0;
    JobAssignUniq = 31, 4;
    SubmitJobHighBg = 32, 3;
    SubmitJobLow = 33, 3;
    SubmitJobLowBg = 34, 3;
    SubmitJobSched = 35, 8;
    SubmitJobEpoch = 36, 4;
}

/// One framed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub kind: PacketType,
    pub args: Vec<Bytes>,
}

impl Packet {
    pub fn request<I, A>(kind: PacketType, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Self {
            magic: Magic::Req,
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn response<I, A>(kind: PacketType, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        Self {
            magic: Magic::Res,
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Response with no payload (NOOP, NO_JOB).
    pub fn empty_response(kind: PacketType) -> Self {
        Self {
            magic: Magic::Res,
            kind,
            args: Vec::new(),
        }
    }

    pub fn arg(&self, index: usize) -> Result<&Bytes> {
        self.args.get(index).ok_or_else(|| {
            GearmanError::Protocol(format!("{:?} is missing argument {}", self.kind, index))
        })
    }

    pub fn arg_str(&self, index: usize) -> Result<&str> {
        std::str::from_utf8(self.arg(index)?).map_err(|_| {
            GearmanError::Protocol(format!("{:?} argument {} is not UTF-8", self.kind, index))
        })
    }

    pub fn arg_u32(&self, index: usize) -> Result<u32> {
        self.arg_str(index)?.trim().parse().map_err(|_| {
            GearmanError::Protocol(format!("{:?} argument {} is not a number", self.kind, index))
        })
    }

    pub fn payload_len(&self) -> usize {
        let args: usize = self.args.iter().map(|a| a.len()).sum();
        args + self.args.len().saturating_sub(1)
    }

    /// Split a payload into exactly `kind.arg_count()` fields. The last field
    /// keeps any embedded NUL bytes.
    pub fn decode_args(kind: PacketType, payload: Bytes) -> Result<Vec<Bytes>> {
        let expected = kind.arg_count();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let mut args = Vec::with_capacity(expected);
        let mut rest = payload;
        for _ in 0..expected - 1 {
            let Some(pos) = rest.iter().position(|b| *b == 0) else {
                return Err(GearmanError::Protocol(format!(
                    "{:?} expects {} arguments, got {}",
                    kind,
                    expected,
                    args.len() + 1
                )));
            };
            args.push(rest.split_to(pos));
            let _ = rest.split_to(1);
        }
        args.push(rest);
        Ok(args)
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.args.len() != self.kind.arg_count() {
            return Err(GearmanError::Protocol(format!(
                "{:?} expects {} arguments, got {}",
                self.kind,
                self.kind.arg_count(),
                self.args.len()
            )));
        }

        let len = self.payload_len();
        let len = u32::try_from(len)
            .map_err(|_| GearmanError::Protocol(format!("payload of {} bytes too large", len)))?;

        dst.reserve(HEADER_LEN + len as usize);
        dst.put_slice(self.magic.as_bytes());
        dst.put_u32(self.kind.code());
        dst.put_u32(len);
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                dst.put_u8(0);
            }
            dst.put_slice(arg);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 1..=36 {
            if code == 5 {
                assert!(PacketType::from_code(code).is_none());
                continue;
            }
            let kind = PacketType::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(PacketType::from_code(37).is_none());
    }

    #[test]
    fn last_argument_keeps_nul_bytes() {
        let payload = Bytes::from_static(b"reverse\0uid-1\0a\0b");
        let args = Packet::decode_args(PacketType::SubmitJob, payload).unwrap();
        assert_eq!(args[0], "reverse");
        assert_eq!(args[1], "uid-1");
        assert_eq!(&args[2][..], b"a\0b");
    }

    #[test]
    fn too_few_fields_is_an_error() {
        let payload = Bytes::from_static(b"reverse");
        let err = Packet::decode_args(PacketType::SubmitJob, payload).unwrap_err();
        assert!(matches!(err, GearmanError::Protocol(_)));
    }

    #[test]
    fn encode_writes_header_and_separators() {
        let packet = Packet::response(PacketType::WorkComplete, ["H:1", "done"]);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();

        assert_eq!(&buf[0..4], b"\0RES");
        assert_eq!(&buf[4..8], &13u32.to_be_bytes());
        assert_eq!(&buf[8..12], &8u32.to_be_bytes());
        assert_eq!(&buf[12..], b"H:1\0done");
    }

    #[test]
    fn encode_rejects_wrong_arity() {
        let packet = Packet::response(PacketType::WorkComplete, ["H:1"]);
        assert!(packet.encode(&mut BytesMut::new()).is_err());
    }

    #[test]
    fn numeric_arguments() {
        let packet = Packet::request(PacketType::WorkStatus, ["H:1", "3", "x"]);
        assert_eq!(packet.arg_u32(1).unwrap(), 3);
        assert!(packet.arg_u32(2).is_err());
        assert!(packet.arg(3).is_err());
    }
}
