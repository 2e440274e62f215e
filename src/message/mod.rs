//! Wire formats of the DTLS records and handshake messages the driver
//! itself reads or writes.
//!
//! Everything else in a handshake is produced and consumed by the SSL
//! engine and only passes through as opaque bytes.

mod client_hello;
mod handshake;
mod hello_request;
mod hello_verify;
mod id;
mod random;
mod record;

pub use client_hello::ClientHello;
pub use handshake::{HandshakeHeader, MessageType};
pub use hello_request::HelloRequest;
pub use hello_verify::HelloVerifyRequest;
pub use id::{Cookie, InvalidLength, SessionId};
pub use random::Random;
pub use record::{ContentType, RecordHeader};

use nom::number::complete::be_u16;
use nom::IResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub const LENGTH: usize = 2;

    pub fn from_u16(value: u16) -> Self {
        match value {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    /// Versions a ClientHello may declare to be admitted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, ProtocolVersion::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

/// Write one plaintext (epoch 0) record holding a single unfragmented
/// handshake message.
pub fn write_handshake_record(
    output: &mut Vec<u8>,
    version: ProtocolVersion,
    sequence_number: u64,
    msg_type: MessageType,
    message_seq: u16,
    body: &[u8],
) {
    let start = output.len();
    let fragment_len = HandshakeHeader::LENGTH + body.len();

    let record = RecordHeader {
        content_type: ContentType::Handshake,
        version,
        epoch: 0,
        sequence_number,
        length: fragment_len as u16,
    };
    record.serialize(output);

    HandshakeHeader::unfragmented(msg_type, message_seq, body.len() as u32).serialize(output);
    output.extend_from_slice(body);

    assert_eq!(output.len() - start, RecordHeader::LENGTH + fragment_len);
}
