use nom::IResult;

use super::{Cookie, ProtocolVersion, Random, SessionId};

/// The leading fields of a ClientHello.
///
/// Only what the cookie exchange needs is decoded. Cipher suites, compression
/// methods and extensions follow on the wire and are left to the SSL engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
}

impl ClientHello {
    pub fn new(
        client_version: ProtocolVersion,
        random: Random,
        session_id: SessionId,
        cookie: Cookie,
    ) -> Self {
        ClientHello {
            client_version,
            random,
            session_id,
            cookie,
        }
    }

    pub fn encoded_length(&self) -> usize {
        ProtocolVersion::LENGTH
            + Random::LENGTH
            + self.session_id.encoded_length()
            + self.cookie.encoded_length()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let start = output.len();

        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cookie.serialize(output);

        assert_eq!(output.len() - start, self.encoded_length());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &[u8] = &[
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        // Random
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E,
        0x1F, 0x20, //
        0x01, // SessionId length
        0xAA, // SessionId
        0x01, // Cookie length
        0xBB, // Cookie
        0x00, 0x04, // CipherSuites length, not decoded
        0xC0, 0x2B, 0xC0, 0x2F,
    ];

    #[test]
    fn roundtrip() {
        let random = Random::parse(&MESSAGE[2..34]).unwrap().1;
        let session_id = SessionId::try_new(&[0xAA]).unwrap();
        let cookie = Cookie::try_new(&[0xBB]).unwrap();

        let client_hello = ClientHello::new(ProtocolVersion::DTLS1_2, random, session_id, cookie);

        let mut serialized = Vec::new();
        client_hello.serialize(&mut serialized);
        assert_eq!(serialized, &MESSAGE[..38]);

        let (rest, parsed) = ClientHello::parse(MESSAGE).unwrap();
        assert_eq!(parsed, client_hello);

        // Cipher suites are left in the remainder.
        assert_eq!(rest, &MESSAGE[38..]);
    }

    #[test]
    fn session_id_too_long() {
        let mut message = MESSAGE.to_vec();
        message[34] = 0x21; // SessionId length (33, which is too long)

        let result = ClientHello::parse(&message);
        assert!(result.is_err());
    }

    #[test]
    fn cookie_too_long_for_input() {
        let mut message = MESSAGE.to_vec();
        message[36] = 0xFF; // Cookie length (255, more than remains)

        let result = ClientHello::parse(&message);
        assert!(result.is_err());
    }

    #[test]
    fn truncated_random() {
        assert!(ClientHello::parse(&MESSAGE[..20]).is_err());
    }
}
