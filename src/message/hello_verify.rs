use nom::IResult;

use crate::message::id::Cookie;
use crate::message::ProtocolVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Cookie,
}

impl HelloVerifyRequest {
    pub fn new(server_version: ProtocolVersion, cookie: Cookie) -> Self {
        HelloVerifyRequest {
            server_version,
            cookie,
        }
    }

    pub fn encoded_length(&self) -> usize {
        ProtocolVersion::LENGTH + self.cookie.encoded_length()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let start = output.len();

        self.server_version.serialize(output);
        self.cookie.serialize(output);

        assert_eq!(output.len() - start, self.encoded_length());
    }
}
