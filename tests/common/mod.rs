//! In-memory datagram network for driving several drivers in one test.

#![allow(unused)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

use dtls_mux::message::{
    write_handshake_record, ClientHello, Cookie, HandshakeHeader, HelloVerifyRequest,
    MessageType, ProtocolVersion, Random, RecordHeader, SessionId,
};
use dtls_mux::{Config, ConnectionState, Driver, Transport};

pub const MAX_SEND_SIZE: usize = 1200;

type Queue = VecDeque<(SocketAddr, Vec<u8>)>;

/// Lossless network. Every address has one receive queue.
#[derive(Clone, Default)]
pub struct Network {
    queues: Rc<RefCell<HashMap<SocketAddr, Queue>>>,
}

impl Network {
    pub fn endpoint(&self, addr: &str) -> MemTransport {
        MemTransport {
            addr: addr.parse().expect("valid socket address"),
            network: self.clone(),
        }
    }

    /// Put a raw datagram on the wire.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        self.queues
            .borrow_mut()
            .entry(to)
            .or_default()
            .push_back((from, data.to_vec()));
    }

    /// Take every datagram queued for `addr`.
    pub fn take(&self, addr: SocketAddr) -> Vec<(SocketAddr, Vec<u8>)> {
        self.queues
            .borrow_mut()
            .get_mut(&addr)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

pub struct MemTransport {
    pub addr: SocketAddr,
    network: Network,
}

impl Transport for MemTransport {
    fn send_dgram(&mut self, addr: SocketAddr, buf: &[u8]) -> io::Result<()> {
        self.network.inject(self.addr, addr, buf);
        Ok(())
    }

    fn recv_dgram(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut queues = self.network.queues.borrow_mut();
        let Some((from, data)) = queues.get_mut(&self.addr).and_then(|q| q.pop_front()) else {
            return Ok(None);
        };
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(Some((n, from)))
    }

    fn max_send_size(&self) -> usize {
        MAX_SEND_SIZE
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().expect("valid socket address")
}

pub fn driver(network: &Network, addr: &str, config: Config) -> Driver<MemTransport> {
    Driver::new(Instant::now(), config, network.endpoint(addr)).expect("driver starts")
}

/// Update both drivers until each has an established connection to the other.
pub fn establish(
    now: Instant,
    a: &mut Driver<MemTransport>,
    b: &mut Driver<MemTransport>,
) {
    let addr_a = a.transport().addr;
    let addr_b = b.transport().addr;

    for _ in 0..50 {
        a.update(now);
        b.update(now);

        if a.state(addr_b) == Some(ConnectionState::Established)
            && b.state(addr_a) == Some(ConnectionState::Established)
        {
            return;
        }
    }

    panic!(
        "Not established: a {:?}, b {:?}",
        a.state(addr_b),
        b.state(addr_a)
    );
}

/// A plaintext ClientHello record as a peer would send it.
pub fn client_hello(message_seq: u16, cookie: &[u8]) -> Vec<u8> {
    let ch = ClientHello::new(
        ProtocolVersion::DTLS1_2,
        Random::new(),
        SessionId::empty(),
        Cookie::try_new(cookie).expect("cookie fits"),
    );

    let mut body = Vec::new();
    ch.serialize(&mut body);
    // One cipher suite, null compression.
    body.extend_from_slice(&[0x00, 0x02, 0xC0, 0x2B, 0x01, 0x00]);

    let mut out = Vec::new();
    write_handshake_record(
        &mut out,
        ProtocolVersion::DTLS1_0,
        message_seq as u64,
        MessageType::ClientHello,
        message_seq,
        &body,
    );
    out
}

/// Split a HelloVerifyRequest datagram into its headers and message.
pub fn parse_hello_verify(
    datagram: &[u8],
) -> (RecordHeader, HandshakeHeader, HelloVerifyRequest) {
    let (rest, record) = RecordHeader::parse(datagram).expect("record header");
    let (body, handshake) = HandshakeHeader::parse(rest).expect("handshake header");
    let (_, hvr) = HelloVerifyRequest::parse(body).expect("HelloVerifyRequest");
    (record, handshake, hvr)
}

/// Run the stateless cookie exchange for `from` against the driver at
/// `to` and return the cookie it handed out.
pub fn fetch_cookie(
    now: Instant,
    network: &Network,
    driver: &mut Driver<MemTransport>,
    from: SocketAddr,
) -> Vec<u8> {
    let to = driver.transport().addr;
    network.inject(from, to, &client_hello(0, &[]));
    driver.update(now);

    let replies = network.take(from);
    assert_eq!(replies.len(), 1, "one HelloVerifyRequest");

    let (_, _, hvr) = parse_hello_verify(&replies[0].1);
    hvr.cookie.to_vec()
}
