//! Secure unreliable peer-to-peer datagrams over DTLS.
//!
//! A [`Driver`] owns a datagram [`Transport`] and multiplexes it between any
//! number of peers, each with its own DTLS connection. There is no
//! distinction between client and server: whoever sends first initiates.
//!
//! Two peers that both send before either has heard from the other each
//! start an initiator. Each then sees the other's ClientHello during its
//! cookie exchange, both connections fail, and the queued datagrams are
//! lost. One side should send first and let the other reply.
//!
//! Unknown peers are answered statelessly with a HelloVerifyRequest cookie.
//! Only a peer that echoes a valid cookie gets a connection, and only while
//! its IP is below [`Config::max_connections_per_ip`]. The admitted peer is
//! then asked, with a HelloRequest, to restart the handshake so the SSL
//! engine sees it from the beginning.
//!
//! Nothing blocks and there are no threads. Time is passed in and every
//! deadline is checked on the next [`Driver::update`].
//!
//! ```no_run
//! use std::net::UdpSocket;
//! use std::time::Instant;
//!
//! use dtls_mux::{Config, Driver};
//!
//! let socket = UdpSocket::bind("0.0.0.0:4433").unwrap();
//! socket.set_nonblocking(true).unwrap();
//!
//! let mut driver = Driver::new(Instant::now(), Config::default(), socket).unwrap();
//! let peer = "192.0.2.1:4433".parse().unwrap();
//!
//! driver.send(Instant::now(), peer, b"hello").unwrap();
//!
//! let mut buf = [0; 2048];
//! loop {
//!     driver.update(Instant::now());
//!     while let Some((n, from)) = driver.receive(&mut buf) {
//!         println!("{}: {:?}", from, &buf[..n]);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

mod certificate;
mod config;
mod connection;
mod cookie;
mod detect;
mod driver;
mod engine;
mod error;
mod framing;
pub mod message;
mod timer;
mod transport;
mod util;

pub use certificate::Identity;
pub use config::{Config, ConfigBuilder};
pub use connection::{ConnectionState, Role};
pub use cookie::{CookieSecret, COOKIE_LENGTH};
pub use detect::{
    client_hello_message_seq, determine_handshake_state, is_client_hello, is_handshake,
    is_hello_request_handshake, is_hello_verify_request, HandshakeState,
};
pub use driver::{Driver, ENCRYPTION_OVERHEAD};
pub use error::Error;
pub use framing::{read_dgrams_from_buffer, Framed};
pub use transport::{Transport, UDP_MAX_SEND_SIZE};
