use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::ProtocolVersion;
use crate::util::{be_u48, put_u48};

/// Header of a DTLS record.
///
/// The `length` is the length of the fragment that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub length: u16,
}

impl RecordHeader {
    /// Encoded size of the header.
    pub const LENGTH: usize = 13;

    pub fn parse(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                epoch,
                sequence_number,
                length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let start = output.len();

        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.epoch.to_be_bytes());
        put_u48(output, self.sequence_number);
        output.extend_from_slice(&self.length.to_be_bytes());

        assert_eq!(output.len() - start, Self::LENGTH);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // sequence_number
        0x00, 0x10, // length
    ];

    #[test]
    fn roundtrip() {
        let header = RecordHeader {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS1_2,
            epoch: 1,
            sequence_number: 1,
            length: 16,
        };

        let mut serialized = Vec::new();
        header.serialize(&mut serialized);
        assert_eq!(serialized, HEADER);

        let (rest, parsed) = RecordHeader::parse(&serialized).unwrap();
        assert_eq!(parsed, header);

        assert!(rest.is_empty());
    }

    #[test]
    fn max_field_values() {
        let header = RecordHeader {
            content_type: ContentType::Unknown(0xFF),
            version: ProtocolVersion::Unknown(0xFFFF),
            epoch: u16::MAX,
            sequence_number: (1 << 48) - 1,
            length: u16::MAX,
        };

        let mut serialized = Vec::new();
        header.serialize(&mut serialized);
        assert_eq!(serialized, [0xFF; 13]);

        let (_, parsed) = RecordHeader::parse(&serialized).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn truncated() {
        for n in 0..RecordHeader::LENGTH {
            assert!(RecordHeader::parse(&HEADER[..n]).is_err());
        }
    }
}
