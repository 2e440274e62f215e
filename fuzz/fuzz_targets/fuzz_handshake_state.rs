#![no_main]

//! Fuzz target for classifying datagrams from unknown peers.
//!
//! Every datagram from an address without a connection goes through
//! `determine_handshake_state` before any state exists, so it must never
//! panic whatever the declared lengths say.

use libfuzzer_sys::fuzz_target;

use dtls_mux::{determine_handshake_state, HandshakeState};

/// DTLS record header length
const DTLS_HEADER_LEN: usize = 13;

fuzz_target!(|data: &[u8]| {
    let _ = determine_handshake_state(data);
    let _ = dtls_mux::is_hello_request_handshake(data);
    let _ = dtls_mux::client_hello_message_seq(data);

    if data.is_empty() {
        return;
    }

    // Plaintext handshake record around the input, with an honest length.
    let frag_len = data.len().min(u16::MAX as usize);
    let mut record = Vec::with_capacity(DTLS_HEADER_LEN + frag_len);
    record.push(22u8); // ContentType::Handshake
    record.extend_from_slice(&[0xFE, 0xFF]); // DTLS 1.0 version
    record.extend_from_slice(&[0, 0]); // epoch 0
    record.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // sequence 0
    record.extend_from_slice(&(frag_len as u16).to_be_bytes());
    record.extend_from_slice(&data[..frag_len]);

    if determine_handshake_state(&record) != HandshakeState::Error {
        // Anything admitted must have been a ClientHello.
        assert!(dtls_mux::is_client_hello(&record));
    }
});
