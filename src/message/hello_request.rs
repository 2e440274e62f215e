use nom::IResult;

use super::{ContentType, HandshakeHeader, MessageType, ProtocolVersion, RecordHeader};

/// A complete HelloRequest datagram.
///
/// The message has no body, so the datagram is the two headers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloRequest {
    pub record: RecordHeader,
    pub handshake: HandshakeHeader,
}

impl HelloRequest {
    pub const LENGTH: usize = RecordHeader::LENGTH + HandshakeHeader::LENGTH;

    pub fn new(version: ProtocolVersion, sequence_number: u64) -> Self {
        HelloRequest {
            record: RecordHeader {
                content_type: ContentType::Handshake,
                version,
                epoch: 0,
                sequence_number,
                length: HandshakeHeader::LENGTH as u16,
            },
            handshake: HandshakeHeader::unfragmented(MessageType::HelloRequest, 0, 0),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloRequest> {
        let (input, record) = RecordHeader::parse(input)?;
        let (input, handshake) = HandshakeHeader::parse(input)?;

        Ok((input, HelloRequest { record, handshake }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let start = output.len();

        self.record.serialize(output);
        self.handshake.serialize(output);

        assert_eq!(output.len() - start, Self::LENGTH);
    }
}
