//! Classification of raw datagrams before any per-peer state exists.
//!
//! The `is_*` helpers only peek at fixed offsets in the first record.
//! [`determine_handshake_state`] does a real parse of a ClientHello and
//! decides how the driver answers a datagram from an unknown peer.

use crate::cookie::COOKIE_LENGTH;
use crate::message::{ClientHello, ContentType, HandshakeHeader, MessageType, RecordHeader};
use crate::Error;

// Record header: content_type(1) + version(2) + epoch(2) + seq(6) + length(2) = 13
const RECORD_HEADER_LEN: usize = RecordHeader::LENGTH;

// Handshake header: msg_type(1) + length(3) + message_seq(2) +
//   fragment_offset(3) + fragment_length(3) = 12
const HANDSHAKE_HEADER_LEN: usize = HandshakeHeader::LENGTH;

const HANDSHAKE: u8 = 22;

/// What to do with a datagram from a peer without a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Drop the datagram.
    Error,
    /// The ClientHello echoes a cookie. Verify it and admit the peer.
    MakeNewConnection,
    /// A first ClientHello. Answer statelessly with a cookie.
    SendHelloVerifyRequest,
}

/// The first record is a handshake record.
pub fn is_handshake(packet: &[u8]) -> bool {
    packet.len() >= RECORD_HEADER_LEN && packet[0] == HANDSHAKE
}

fn handshake_type(packet: &[u8]) -> Option<MessageType> {
    if !is_handshake(packet) {
        return None;
    }
    packet.get(RECORD_HEADER_LEN).map(|t| MessageType::from_u8(*t))
}

pub fn is_client_hello(packet: &[u8]) -> bool {
    handshake_type(packet) == Some(MessageType::ClientHello)
}

pub fn is_hello_verify_request(packet: &[u8]) -> bool {
    handshake_type(packet) == Some(MessageType::HelloVerifyRequest)
}

/// A plaintext HelloRequest.
///
/// Requires epoch 0 so that the first ciphertext byte of an encrypted
/// handshake record can never be mistaken for the message type.
pub fn is_hello_request_handshake(packet: &[u8]) -> bool {
    if packet.len() < RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN {
        return false;
    }
    let epoch = u16::from_be_bytes([packet[3], packet[4]]);
    epoch == 0 && handshake_type(packet) == Some(MessageType::HelloRequest)
}

/// Handshake message sequence of a ClientHello, if this is one.
pub fn client_hello_message_seq(packet: &[u8]) -> Option<u16> {
    if !is_client_hello(packet) || packet.len() < RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN {
        return None;
    }
    // msg_type(1) + length(3) before message_seq
    let at = RECORD_HEADER_LEN + 4;
    Some(u16::from_be_bytes([packet[at], packet[at + 1]]))
}

/// Parse the first record of `packet` as a complete, unfragmented ClientHello.
///
/// Fails if any declared length runs past the received bytes.
pub fn parse_client_hello(
    packet: &[u8],
) -> Result<(RecordHeader, HandshakeHeader, ClientHello), Error> {
    let (rest, record) = RecordHeader::parse(packet)?;

    if record.content_type != ContentType::Handshake {
        return Err(Error::Parse(nom::error::ErrorKind::Tag));
    }

    let Some(fragment) = rest.get(..record.length as usize) else {
        return Err(Error::ParseIncomplete);
    };

    let (body, handshake) = HandshakeHeader::parse(fragment)?;

    if handshake.msg_type != MessageType::ClientHello {
        return Err(Error::Parse(nom::error::ErrorKind::Tag));
    }

    if handshake.is_fragment() {
        return Err(Error::Parse(nom::error::ErrorKind::LengthValue));
    }

    let Some(body) = body.get(..handshake.fragment_length as usize) else {
        return Err(Error::ParseIncomplete);
    };

    let (_, client_hello) = ClientHello::parse(body)?;

    Ok((record, handshake, client_hello))
}

/// Decide how to answer a datagram from an unknown peer.
pub fn determine_handshake_state(packet: &[u8]) -> HandshakeState {
    let (_, handshake, client_hello) = match parse_client_hello(packet) {
        Ok(v) => v,
        Err(e) => {
            trace!("Not a usable ClientHello: {}", e);
            return HandshakeState::Error;
        }
    };

    if !client_hello.client_version.is_accepted() {
        debug!(
            "ClientHello with unsupported version: {:?}",
            client_hello.client_version
        );
        return HandshakeState::Error;
    }

    match handshake.message_seq {
        0 => HandshakeState::SendHelloVerifyRequest,
        1 if client_hello.cookie.len() == COOKIE_LENGTH => HandshakeState::MakeNewConnection,
        seq => {
            debug!(
                "ClientHello with message_seq {} and cookie length {}",
                seq,
                client_hello.cookie.len()
            );
            HandshakeState::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        write_handshake_record, Cookie, HelloRequest, ProtocolVersion, Random, SessionId,
    };

    fn client_hello(version: ProtocolVersion, message_seq: u16, cookie: &[u8]) -> Vec<u8> {
        let ch = ClientHello::new(
            version,
            Random::new(),
            SessionId::empty(),
            Cookie::try_new(cookie).unwrap(),
        );
        let mut body = Vec::new();
        ch.serialize(&mut body);
        // Cipher suites and compression methods, opaque to the driver.
        body.extend_from_slice(&[0x00, 0x02, 0xC0, 0x2B, 0x01, 0x00]);

        let mut out = Vec::new();
        write_handshake_record(
            &mut out,
            ProtocolVersion::DTLS1_0,
            0,
            MessageType::ClientHello,
            message_seq,
            &body,
        );
        out
    }

    #[test]
    fn first_client_hello_gets_hello_verify_request() {
        let packet = client_hello(ProtocolVersion::DTLS1_2, 0, &[]);
        assert!(is_handshake(&packet));
        assert!(is_client_hello(&packet));
        assert_eq!(client_hello_message_seq(&packet), Some(0));
        assert_eq!(
            determine_handshake_state(&packet),
            HandshakeState::SendHelloVerifyRequest
        );
    }

    #[test]
    fn cookie_client_hello_makes_connection() {
        let packet = client_hello(ProtocolVersion::DTLS1_0, 1, &[0xAB; COOKIE_LENGTH]);
        assert_eq!(
            determine_handshake_state(&packet),
            HandshakeState::MakeNewConnection
        );
    }

    #[test]
    fn wrong_cookie_length_is_error() {
        let packet = client_hello(ProtocolVersion::DTLS1_2, 1, &[0xAB; COOKIE_LENGTH - 1]);
        assert_eq!(determine_handshake_state(&packet), HandshakeState::Error);

        let packet = client_hello(ProtocolVersion::DTLS1_2, 1, &[]);
        assert_eq!(determine_handshake_state(&packet), HandshakeState::Error);
    }

    #[test]
    fn later_sequence_is_error() {
        let packet = client_hello(ProtocolVersion::DTLS1_2, 2, &[0xAB; COOKIE_LENGTH]);
        assert_eq!(determine_handshake_state(&packet), HandshakeState::Error);
    }

    #[test]
    fn wrong_version_is_error() {
        let packet = client_hello(ProtocolVersion::Unknown(0x0303), 0, &[]);
        assert_eq!(determine_handshake_state(&packet), HandshakeState::Error);
    }

    #[test]
    fn truncated_is_error() {
        let packet = client_hello(ProtocolVersion::DTLS1_2, 0, &[]);
        for n in 0..packet.len() - 6 {
            assert_eq!(
                determine_handshake_state(&packet[..n]),
                HandshakeState::Error,
                "truncated to {}",
                n
            );
        }
    }

    #[test]
    fn oversized_declared_length_is_error() {
        let mut packet = client_hello(ProtocolVersion::DTLS1_2, 0, &[]);
        let declared = u16::from_be_bytes([packet[11], packet[12]]) + 1;
        packet[11..13].copy_from_slice(&declared.to_be_bytes());
        assert_eq!(determine_handshake_state(&packet), HandshakeState::Error);
    }

    #[test]
    fn non_client_hello_is_error() {
        let mut hello_request = Vec::new();
        HelloRequest::new(ProtocolVersion::DTLS1_2, 0).serialize(&mut hello_request);
        assert!(is_hello_request_handshake(&hello_request));
        assert!(!is_client_hello(&hello_request));
        assert_eq!(
            determine_handshake_state(&hello_request),
            HandshakeState::Error
        );

        let mut hvr = Vec::new();
        write_handshake_record(
            &mut hvr,
            ProtocolVersion::DTLS1_0,
            0,
            MessageType::HelloVerifyRequest,
            0,
            &[0xFE, 0xFF, 0x00],
        );
        assert!(is_hello_verify_request(&hvr));
        assert_eq!(determine_handshake_state(&hvr), HandshakeState::Error);

        let mut app_data = client_hello(ProtocolVersion::DTLS1_2, 0, &[]);
        app_data[0] = 23;
        assert!(!is_handshake(&app_data));
        assert_eq!(determine_handshake_state(&app_data), HandshakeState::Error);
    }

    #[test]
    fn encrypted_record_is_not_hello_request() {
        let mut packet = Vec::new();
        HelloRequest::new(ProtocolVersion::DTLS1_2, 0).serialize(&mut packet);
        // epoch 1
        packet[4] = 1;
        assert!(!is_hello_request_handshake(&packet));
    }
}
