//! Multiplexes one transport between many peers.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use openssl::ssl::SslContext;

use crate::connection::{Connection, ConnectionState, Role};
use crate::cookie::CookieSecret;
use crate::detect::{determine_handshake_state, parse_client_hello, HandshakeState};
use crate::engine::build_context;
use crate::message::{
    write_handshake_record, HelloVerifyRequest, MessageType, ProtocolVersion, RecordHeader,
};
use crate::transport::Transport;
use crate::{Config, Error};

/// Growth of a plaintext record when encrypted. AES-GCM adds an 8 byte
/// explicit nonce and a 16 byte tag, rounded up.
pub const ENCRYPTION_OVERHEAD: usize = 64;

// Fits any UDP datagram.
const SCRATCH_SIZE: usize = 65_536;

/// DTLS multiplexer over a datagram [`Transport`].
///
/// Everything happens inside [`Driver::update`]. [`Driver::send`] and
/// [`Driver::receive`] only touch queues.
pub struct Driver<T: Transport> {
    transport: T,
    config: Config,
    context: SslContext,

    connections: HashMap<SocketAddr, Connection>,

    /// Live connections per remote IP, initiated or accepted.
    connections_per_ip: HashMap<IpAddr, usize>,

    cookie_secret: CookieSecret,

    /// Decrypted datagrams for [`Driver::receive`].
    inbound: VecDeque<(SocketAddr, Vec<u8>)>,

    /// Receive buffer, lent to one connection at a time while updating.
    scratch: Vec<u8>,
}

impl<T: Transport> Driver<T> {
    /// Set up the SSL context and seed the cookie secret.
    pub fn new(now: Instant, config: Config, transport: T) -> Result<Self, Error> {
        let context = build_context(&config)?;

        let mut cookie_secret = CookieSecret::new(config.cookie_rotation());
        cookie_secret.rotate(now, true)?;

        info!(
            "Driver started, max send size {}, timeout {:?}, max {} connections per IP",
            transport
                .max_send_size()
                .saturating_sub(RecordHeader::LENGTH + ENCRYPTION_OVERHEAD),
            config.timeout(),
            config.max_connections_per_ip()
        );

        Ok(Driver {
            transport,
            config,
            context,
            connections: HashMap::new(),
            connections_per_ip: HashMap::new(),
            cookie_secret,
            inbound: VecDeque::new(),
            scratch: vec![0; SCRATCH_SIZE],
        })
    }

    /// Run one round: read the transport, update every connection, write
    /// the transport.
    pub fn update(&mut self, now: Instant) {
        if let Err(e) = self.cookie_secret.rotate(now, false) {
            warn!("Failed to rotate cookie secret: {}", e);
        }

        self.flush_socket_to_connections(now);
        self.update_connections(now);
        self.flush_connections_to_socket();
    }

    /// Queue `data` for `peer`, connecting if there is no connection yet.
    ///
    /// Datagrams larger than [`Driver::max_send_size`] are dropped. Only a
    /// failure to create the connection is an error.
    pub fn send(&mut self, now: Instant, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let max = self.max_send_size();
        if data.len() > max {
            warn!(
                "Drop {} bytes to {}, larger than max send size {}",
                data.len(),
                peer,
                max
            );
            return Ok(());
        }

        if data.is_empty() {
            trace!("Drop empty datagram to {}", peer);
            return Ok(());
        }

        let mtu = self.mtu();

        let connection = match self.connections.entry(peer) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => {
                let connection =
                    Connection::initiator(now, peer, &self.context, mtu, &self.config)?;
                *self.connections_per_ip.entry(peer.ip()).or_insert(0) += 1;
                v.insert(connection)
            }
        };

        connection.queue_send(data);

        Ok(())
    }

    /// Pop one decrypted datagram into `buf`.
    ///
    /// A datagram that does not fit is dropped, never truncated, and this
    /// call returns `None` even if more datagrams are queued. A loop of
    /// `while let Some(..) = driver.receive(..)` then stops early and picks
    /// up the rest on its next pass.
    pub fn receive(&mut self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        let (from, data) = self.inbound.pop_front()?;

        if data.len() > buf.len() {
            warn!(
                "Drop {} bytes from {}, receive buffer is {}",
                data.len(),
                from,
                buf.len()
            );
            return None;
        }

        buf[..data.len()].copy_from_slice(&data);
        Some((data.len(), from))
    }

    /// Largest plaintext datagram that fits one encrypted record on the
    /// transport.
    pub fn max_send_size(&self) -> usize {
        self.transport
            .max_send_size()
            .saturating_sub(RecordHeader::LENGTH + ENCRYPTION_OVERHEAD)
    }

    /// Close the connection to `peer`. It is removed on the next update.
    pub fn disconnect(&mut self, now: Instant, peer: SocketAddr) -> bool {
        match self.connections.get_mut(&peer) {
            Some(connection) => {
                connection.disconnect(now);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, peer: SocketAddr) -> Option<ConnectionState> {
        self.connections.get(&peer).map(|c| c.state())
    }

    pub fn role(&self, peer: SocketAddr) -> Option<Role> {
        self.connections.get(&peer).map(|c| c.role())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Live connections counted against `ip`.
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.connections_per_ip.get(&ip).copied().unwrap_or(0)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn mtu(&self) -> u32 {
        u32::try_from(self.transport.max_send_size()).unwrap_or(u32::MAX)
    }

    fn flush_socket_to_connections(&mut self, now: Instant) {
        let mut buf = mem::take(&mut self.scratch);

        loop {
            let (n, from) = match self.transport.recv_dgram(&mut buf) {
                Ok(Some(v)) => v,
                Ok(None) => break,
                Err(e) => {
                    warn!("Transport receive failed: {}", e);
                    break;
                }
            };

            self.route(now, from, &buf[..n]);
        }

        self.scratch = buf;
    }

    fn route(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        if let Some(connection) = self.connections.get_mut(&from) {
            connection.add_dtls_dgram(now, datagram);
            return;
        }

        match determine_handshake_state(datagram) {
            HandshakeState::SendHelloVerifyRequest => {
                self.send_hello_verify_request(now, from, datagram)
            }
            HandshakeState::MakeNewConnection => self.admit(now, from, datagram),
            HandshakeState::Error => {
                trace!("Drop {} bytes from unknown peer {}", datagram.len(), from);
            }
        }
    }

    /// Answer a first ClientHello statelessly. Nothing about `from` is kept.
    fn send_hello_verify_request(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        let Ok((record, _, _)) = parse_client_hello(datagram) else {
            return;
        };

        let cookie = match self.cookie_secret.generate(now, &from) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to generate cookie for {}: {}", from, e);
                return;
            }
        };

        let hello_verify = HelloVerifyRequest::new(ProtocolVersion::DTLS1_0, cookie);
        let mut body = Vec::with_capacity(hello_verify.encoded_length());
        hello_verify.serialize(&mut body);

        let mut out = Vec::new();
        write_handshake_record(
            &mut out,
            ProtocolVersion::DTLS1_0,
            record.sequence_number,
            MessageType::HelloVerifyRequest,
            0,
            &body,
        );

        trace!("Send HelloVerifyRequest to {}", from);

        if let Err(e) = self.transport.send_dgram(from, &out) {
            warn!("Failed to send HelloVerifyRequest to {}: {}", from, e);
        }
    }

    /// Admit a peer that echoed a valid cookie, if its IP is below the cap.
    fn admit(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        let Ok((_, _, client_hello)) = parse_client_hello(datagram) else {
            return;
        };

        if !self.cookie_secret.verify(now, &from, &client_hello.cookie) {
            debug!("Cookie mismatch from {}", from);
            return;
        }

        let count = self.connections_from(from.ip());
        if count >= self.config.max_connections_per_ip() {
            trace!("Drop ClientHello from {}, {} connections from IP", from, count);
            return;
        }

        let mtu = self.mtu();
        match Connection::responder(now, from, &self.context, mtu, &self.config) {
            Ok(connection) => {
                self.connections.insert(from, connection);
                *self.connections_per_ip.entry(from.ip()).or_insert(0) += 1;
            }
            Err(e) => warn!("Failed to create connection for {}: {}", from, e),
        }
    }

    fn update_connections(&mut self, now: Instant) {
        for connection in self.connections.values_mut() {
            connection.update(now, &mut self.scratch, &mut self.inbound);
        }

        let transport = &mut self.transport;
        let counters = &mut self.connections_per_ip;

        self.connections.retain(|peer, connection| {
            if !connection.is_disconnected() {
                return true;
            }

            // Last words, like close_notify, still go out.
            flush(transport, connection);
            release(counters, peer.ip());

            match connection.error() {
                Some(e) => debug!("Removed connection to {} after error: {}", peer, e),
                None => debug!("Removed connection to {}", peer),
            }
            false
        });
    }

    fn flush_connections_to_socket(&mut self) {
        for connection in self.connections.values_mut() {
            flush(&mut self.transport, connection);
        }
    }
}

fn flush<T: Transport>(transport: &mut T, connection: &mut Connection) {
    let peer = connection.peer();
    while let Some(datagram) = connection.pop_outbound() {
        if let Err(e) = transport.send_dgram(peer, &datagram) {
            warn!("Failed to send {} bytes to {}: {}", datagram.len(), peer, e);
        }
    }
}

fn release(counters: &mut HashMap<IpAddr, usize>, ip: IpAddr) {
    match counters.get_mut(&ip) {
        Some(n) if *n > 1 => *n -= 1,
        Some(_) => {
            counters.remove(&ip);
        }
        None => warn!("No connection count for {}", ip),
    }
}
