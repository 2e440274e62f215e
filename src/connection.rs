//! Per-peer connection.
//!
//! A connection is a hierarchical state machine over one SSL engine. Each
//! state runs a list of handlers from the outermost parent down to the
//! state itself. The first handler that asks for a transition ends the
//! update.
//!
//! Initiator:
//!
//! ```text
//! CookieExchange -- HelloRequest --> SslHandshakeConnect --> Established
//!       ^                                   |
//!       '-------- HandshakeRetry <----------'  (retry deadline)
//! ```
//!
//! Responder:
//!
//! ```text
//! WaitForStatefulHandshake -- ClientHello --> SslHandshakeAccept --> Established
//! ```
//!
//! Any engine failure goes to SslError and then Disconnected. A connection
//! that is not established within the timeout is Disconnected.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use openssl::ssl::SslContext;

use crate::detect::{client_hello_message_seq, is_hello_request_handshake};
use crate::engine::{Engine, Mode, Step};
use crate::framing::read_dgrams_from_buffer;
use crate::message::{HelloRequest, ProtocolVersion};
use crate::timer::ExponentialBackoff;
use crate::{Config, Error};

/// Publicly observable state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Responder waiting for the initiator's stateful ClientHello.
    WaitForStatefulHandshake,
    /// Responder running the handshake.
    SslHandshakeAccept,
    /// Initiator running the cookie exchange.
    CookieExchange,
    /// Initiator running the handshake after the responder's HelloRequest.
    SslHandshakeConnect,
    /// Initiator restarting the handshake from scratch.
    HandshakeRetry,
    Established,
    /// The engine failed. Disconnected on the next update.
    SslError,
    Disconnected,
}

/// Which side started the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitForStatefulHandshake { next_hello_request: Instant },
    SslHandshakeAccept,
    CookieExchange { retry_at: Instant },
    SslHandshakeConnect { retry_at: Instant },
    HandshakeRetry,
    Established,
    SslError,
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
enum Handler {
    Active,
    Accept,
    WaitFor,
    Connect,
    Established,
    SslError,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::WaitForStatefulHandshake { .. } => "WaitForStatefulHandshake",
            State::SslHandshakeAccept => "SslHandshakeAccept",
            State::CookieExchange { .. } => "CookieExchange",
            State::SslHandshakeConnect { .. } => "SslHandshakeConnect",
            State::HandshakeRetry => "HandshakeRetry",
            State::Established => "Established",
            State::SslError => "SslError",
            State::Disconnected => "Disconnected",
        }
    }

    /// Handlers to run for this state, outermost parent first.
    fn handlers(&self) -> &'static [Handler] {
        use Handler::*;
        match self {
            State::WaitForStatefulHandshake { .. } => &[Active, Accept, WaitFor],
            State::SslHandshakeAccept => &[Active, Accept],
            State::CookieExchange { .. }
            | State::SslHandshakeConnect { .. }
            | State::HandshakeRetry => &[Active, Connect],
            State::Established => &[Active, Established],
            State::SslError => &[SslError],
            State::Disconnected => &[],
        }
    }

    fn public(&self) -> ConnectionState {
        match self {
            State::WaitForStatefulHandshake { .. } => ConnectionState::WaitForStatefulHandshake,
            State::SslHandshakeAccept => ConnectionState::SslHandshakeAccept,
            State::CookieExchange { .. } => ConnectionState::CookieExchange,
            State::SslHandshakeConnect { .. } => ConnectionState::SslHandshakeConnect,
            State::HandshakeRetry => ConnectionState::HandshakeRetry,
            State::Established => ConnectionState::Established,
            State::SslError => ConnectionState::SslError,
            State::Disconnected => ConnectionState::Disconnected,
        }
    }
}

pub struct Connection {
    peer: SocketAddr,
    role: Role,
    state: State,

    /// Recreated whenever an initiator restarts its handshake.
    engine: Engine,
    context: SslContext,
    mtu: u32,

    created: Instant,
    timeout: Duration,

    /// Set once established. A bound connection no longer times out.
    bound: bool,

    hello_request_backoff: ExponentialBackoff,
    hello_request_sequence: u64,

    /// Plaintext waiting for the connection to be established.
    pending: VecDeque<Vec<u8>>,

    /// Ciphertext datagrams for the transport.
    outbound: VecDeque<Vec<u8>>,

    /// Reason for the last SslError.
    error: Option<String>,
}

impl Connection {
    /// A connection we initiate. Starts with the cookie exchange.
    pub fn initiator(
        now: Instant,
        peer: SocketAddr,
        context: &SslContext,
        mtu: u32,
        config: &Config,
    ) -> Result<Self, Error> {
        let state = State::CookieExchange {
            retry_at: now + config.timeout(),
        };
        Self::new(now, peer, Role::Initiator, state, context, mtu, config)
    }

    /// A connection admitted by a verified cookie. Starts by asking the
    /// initiator for a fresh, stateful handshake.
    pub fn responder(
        now: Instant,
        peer: SocketAddr,
        context: &SslContext,
        mtu: u32,
        config: &Config,
    ) -> Result<Self, Error> {
        let state = State::WaitForStatefulHandshake {
            next_hello_request: now,
        };
        Self::new(now, peer, Role::Responder, state, context, mtu, config)
    }

    fn new(
        now: Instant,
        peer: SocketAddr,
        role: Role,
        state: State,
        context: &SslContext,
        mtu: u32,
        config: &Config,
    ) -> Result<Self, Error> {
        let mode = match role {
            Role::Initiator => Mode::Client,
            Role::Responder => Mode::Server,
        };

        debug!("{} New {:?} in {}", peer, role, state.name());

        Ok(Connection {
            peer,
            role,
            state,
            engine: Engine::new(context, mtu, mode)?,
            context: context.clone(),
            mtu,
            created: now,
            timeout: config.timeout(),
            bound: false,
            hello_request_backoff: ExponentialBackoff::new(config.hello_request_start_rto()),
            hello_request_sequence: 0,
            pending: VecDeque::new(),
            outbound: VecDeque::new(),
            error: None,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state.public()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == State::Disconnected
    }

    /// Why the engine failed, if it did.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Mark the connection as bound, exempting it from the handshake timeout.
    pub(crate) fn bind(&mut self) {
        self.bound = true;
    }

    /// Queue plaintext. Written once the connection is established.
    pub fn queue_send(&mut self, data: &[u8]) {
        self.pending.push_back(data.to_vec());
    }

    /// Next ciphertext datagram to send to the peer.
    pub fn pop_outbound(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    /// Handle a ciphertext datagram from the peer.
    pub fn add_dtls_dgram(&mut self, now: Instant, datagram: &[u8]) {
        match self.state {
            State::WaitForStatefulHandshake { .. } => {
                // Only a fresh handshake is accepted. The cookie ClientHello
                // that created this connection and its retransmits are not.
                if client_hello_message_seq(datagram) == Some(0) {
                    self.engine.push_input(datagram);
                    self.transition(now, State::SslHandshakeAccept);
                } else {
                    trace!("{} Drop datagram while waiting for ClientHello", self.peer);
                }
            }

            State::CookieExchange { retry_at } => {
                if is_hello_request_handshake(datagram) {
                    self.transition(now, State::SslHandshakeConnect { retry_at });
                } else {
                    self.engine.push_input(datagram);
                }
            }

            State::SslHandshakeConnect { .. } => {
                if is_hello_request_handshake(datagram) {
                    trace!("{} Drop retransmitted HelloRequest", self.peer);
                } else {
                    self.engine.push_input(datagram);
                }
            }

            State::Disconnected => {
                trace!("{} Drop datagram for disconnected", self.peer);
            }

            _ => self.engine.push_input(datagram),
        }
    }

    /// Advance the connection.
    ///
    /// Plaintext read from the peer is appended to `inbound`, using
    /// `scratch` as the read buffer.
    pub fn update(
        &mut self,
        now: Instant,
        scratch: &mut [u8],
        inbound: &mut VecDeque<(SocketAddr, Vec<u8>)>,
    ) {
        for handler in self.state.handlers() {
            let next = match handler {
                Handler::Active => self.handle_active(now),
                Handler::Accept => self.handle_accept(),
                Handler::WaitFor => self.handle_wait_for(now),
                Handler::Connect => self.handle_connect(now),
                Handler::Established => self.handle_established(scratch, inbound),
                Handler::SslError => Some(State::Disconnected),
            };

            if let Some(next) = next {
                self.transition(now, next);
                break;
            }
        }

        self.drain_output();
    }

    /// Close the connection. An established one sends close_notify first.
    pub fn disconnect(&mut self, now: Instant) {
        if self.state == State::Disconnected {
            return;
        }

        if self.state == State::Established {
            if let Err(e) = self.engine.shutdown() {
                debug!("{} Shutdown failed: {}", self.peer, e);
            }
            self.drain_output();
        }

        self.transition(now, State::Disconnected);
    }

    fn handle_active(&mut self, now: Instant) -> Option<State> {
        let elapsed = now.saturating_duration_since(self.created);
        if !self.bound && elapsed > self.timeout {
            debug!(
                "{} Not established within {:?}, in {}",
                self.peer,
                self.timeout,
                self.state.name()
            );
            return Some(State::Disconnected);
        }
        None
    }

    fn handle_accept(&mut self) -> Option<State> {
        match self.engine.handshake() {
            Ok(Step::Complete) => Some(State::Established),
            Ok(Step::WouldBlock) => None,
            Err(e) => Some(self.fail(e)),
        }
    }

    fn handle_wait_for(&mut self, now: Instant) -> Option<State> {
        let State::WaitForStatefulHandshake { next_hello_request } = self.state else {
            return None;
        };

        if now < next_hello_request {
            return None;
        }

        let mut datagram = Vec::with_capacity(HelloRequest::LENGTH);
        HelloRequest::new(ProtocolVersion::DTLS1_2, self.hello_request_sequence)
            .serialize(&mut datagram);
        self.hello_request_sequence += 1;
        self.outbound.push_back(datagram);

        trace!(
            "{} Send HelloRequest, next in {:?}",
            self.peer,
            self.hello_request_backoff.rto()
        );

        // Same state, new deadline. Not a transition.
        self.state = State::WaitForStatefulHandshake {
            next_hello_request: self.hello_request_backoff.attempt(now),
        };

        None
    }

    fn handle_connect(&mut self, now: Instant) -> Option<State> {
        let retry_at = match self.state {
            State::CookieExchange { retry_at } | State::SslHandshakeConnect { retry_at } => {
                retry_at
            }
            _ => return None,
        };

        if now >= retry_at {
            debug!("{} Handshake not done in {}, retry", self.peer, self.state.name());
            return Some(State::HandshakeRetry);
        }

        match self.engine.handshake() {
            Ok(Step::Complete) => Some(State::Established),
            Ok(Step::WouldBlock) => None,
            Err(e) => Some(self.fail(e)),
        }
    }

    fn handle_established(
        &mut self,
        scratch: &mut [u8],
        inbound: &mut VecDeque<(SocketAddr, Vec<u8>)>,
    ) -> Option<State> {
        loop {
            match self.engine.read(scratch) {
                Ok(Some(n)) => inbound.push_back((self.peer, scratch[..n].to_vec())),
                Ok(None) => break,
                Err(Error::Closed) => {
                    debug!("{} Peer closed", self.peer);
                    return Some(State::Disconnected);
                }
                Err(e) => return Some(self.fail(e)),
            }
        }

        while let Some(data) = self.pending.front() {
            match self.engine.write(data) {
                Ok(true) => {
                    self.pending.pop_front();
                }
                Ok(false) => break,
                Err(e) => return Some(self.fail(e)),
            }
        }

        None
    }

    fn fail(&mut self, error: Error) -> State {
        self.error = Some(error.to_string());
        State::SslError
    }

    fn transition(&mut self, now: Instant, next: State) {
        let mut next = next;
        loop {
            trace!("{} {} -> {}", self.peer, self.state.name(), next.name());
            self.state = next;

            match self.enter(now) {
                Some(chained) => next = chained,
                None => break,
            }
        }
    }

    /// Entry action of the current state. May chain into another state.
    fn enter(&mut self, now: Instant) -> Option<State> {
        match self.state {
            State::SslHandshakeConnect { .. } => self.restart_engine().err(),

            State::HandshakeRetry => {
                if let Err(state) = self.restart_engine() {
                    return Some(state);
                }
                Some(State::CookieExchange {
                    retry_at: now + self.timeout,
                })
            }

            State::SslHandshakeAccept => {
                debug!("{} Accepting handshake", self.peer);
                None
            }

            State::Established => {
                self.bind();
                match self.engine.peer_fingerprint() {
                    Some(fp) => info!("{} Established, peer certificate {}", self.peer, fp),
                    None => info!("{} Established", self.peer),
                }
                None
            }

            State::SslError => {
                warn!(
                    "{} SSL error: {}",
                    self.peer,
                    self.error.as_deref().unwrap_or("unknown")
                );
                None
            }

            State::Disconnected => {
                debug!("{} Disconnected", self.peer);
                None
            }

            _ => None,
        }
    }

    fn restart_engine(&mut self) -> Result<(), State> {
        match Engine::new(&self.context, self.mtu, Mode::Client) {
            Ok(engine) => {
                self.engine = engine;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn drain_output(&mut self) {
        let output = self.engine.take_output();
        if output.is_empty() {
            return;
        }

        let framed = read_dgrams_from_buffer(&output);
        if framed.lost > 0 {
            warn!(
                "{} Dropped {} bytes of incomplete engine output",
                self.peer, framed.lost
            );
        }

        self.outbound.extend(framed.datagrams);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{is_client_hello, is_hello_request_handshake};
    use crate::engine::build_context;

    const RTO: Duration = Duration::from_millis(500);
    const TIMEOUT: Duration = Duration::from_secs(10);
    const MTU: u32 = 1150;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn config() -> Config {
        Config::builder()
            .timeout(TIMEOUT)
            .hello_request_start_rto(RTO)
            .build()
            .unwrap()
    }

    fn drain(conn: &mut Connection) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| conn.pop_outbound()).collect()
    }

    fn deliver(now: Instant, from: &mut Connection, to: &mut Connection) {
        for d in drain(from) {
            to.add_dtls_dgram(now, &d);
        }
    }

    struct Harness {
        ctx: SslContext,
        config: Config,
        scratch: Vec<u8>,
        inbound: VecDeque<(SocketAddr, Vec<u8>)>,
    }

    impl Harness {
        fn new() -> Self {
            let config = config();
            Harness {
                ctx: build_context(&config).unwrap(),
                config,
                scratch: vec![0; 2048],
                inbound: VecDeque::new(),
            }
        }

        fn initiator(&self, now: Instant, peer: SocketAddr) -> Connection {
            Connection::initiator(now, peer, &self.ctx, MTU, &self.config).unwrap()
        }

        fn responder(&self, now: Instant, peer: SocketAddr) -> Connection {
            Connection::responder(now, peer, &self.ctx, MTU, &self.config).unwrap()
        }

        fn update(&mut self, now: Instant, conn: &mut Connection) {
            conn.update(now, &mut self.scratch, &mut self.inbound);
        }
    }

    #[test]
    fn responder_hello_request_backoff() {
        let mut h = Harness::new();
        let now = Instant::now();
        let mut b = h.responder(now, addr("10.0.0.1:1000"));
        assert_eq!(b.role(), Role::Responder);
        assert_eq!(b.state(), ConnectionState::WaitForStatefulHandshake);

        h.update(now, &mut b);
        let sent = drain(&mut b);
        assert_eq!(sent.len(), 1);
        assert!(is_hello_request_handshake(&sent[0]));

        h.update(now + RTO / 2, &mut b);
        assert!(drain(&mut b).is_empty());

        h.update(now + RTO, &mut b);
        assert_eq!(drain(&mut b).len(), 1);

        // Interval doubled: next one at RTO + 2 * RTO.
        h.update(now + RTO * 2, &mut b);
        assert!(drain(&mut b).is_empty());
        h.update(now + RTO * 3, &mut b);
        assert_eq!(drain(&mut b).len(), 1);

        assert_eq!(b.state(), ConnectionState::WaitForStatefulHandshake);
    }

    #[test]
    fn responder_ignores_all_but_first_client_hello() {
        let mut h = Harness::new();
        let now = Instant::now();
        let mut b = h.responder(now, addr("10.0.0.1:1000"));
        let mut a = h.initiator(now, addr("10.0.0.2:2000"));

        h.update(now, &mut a);
        let mut client_hello = drain(&mut a).remove(0);
        assert!(is_client_hello(&client_hello));

        // message_seq 1, like the ClientHello that carried the cookie.
        client_hello[13 + 5] = 1;
        b.add_dtls_dgram(now, &client_hello);
        assert_eq!(b.state(), ConnectionState::WaitForStatefulHandshake);

        b.add_dtls_dgram(now, b"garbage");
        assert_eq!(b.state(), ConnectionState::WaitForStatefulHandshake);

        client_hello[13 + 5] = 0;
        b.add_dtls_dgram(now, &client_hello);
        assert_eq!(b.state(), ConnectionState::SslHandshakeAccept);
    }

    #[test]
    fn unbound_times_out() {
        let mut h = Harness::new();
        let now = Instant::now();
        let mut b = h.responder(now, addr("10.0.0.1:1000"));
        let mut a = h.initiator(now, addr("10.0.0.2:2000"));

        h.update(now + TIMEOUT, &mut b);
        assert_eq!(b.state(), ConnectionState::WaitForStatefulHandshake);

        let later = now + TIMEOUT + Duration::from_millis(1);
        h.update(later, &mut a);
        h.update(later, &mut b);
        assert!(a.is_disconnected());
        assert!(b.is_disconnected());

        // Nothing more happens once disconnected.
        drain(&mut b);
        h.update(later + TIMEOUT, &mut b);
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn bound_initiator_retries_handshake() {
        let mut h = Harness::new();
        let now = Instant::now();
        let mut a = h.initiator(now, addr("10.0.0.2:2000"));

        h.update(now, &mut a);
        assert_eq!(drain(&mut a).len(), 1);
        a.bind();

        let later = now + TIMEOUT + Duration::from_millis(1);
        h.update(later, &mut a);
        assert_eq!(a.state(), ConnectionState::CookieExchange);

        // The fresh engine starts over with a new ClientHello.
        h.update(later + Duration::from_millis(1), &mut a);
        let sent = drain(&mut a);
        assert_eq!(sent.len(), 1);
        assert!(is_client_hello(&sent[0]));
        assert_eq!(client_hello_message_seq(&sent[0]), Some(0));
    }

    #[test]
    fn hello_request_switches_initiator_to_connect() {
        let mut h = Harness::new();
        let now = Instant::now();
        let mut a = h.initiator(now, addr("10.0.0.2:2000"));

        let mut hello_request = Vec::new();
        HelloRequest::new(ProtocolVersion::DTLS1_2, 0).serialize(&mut hello_request);

        a.add_dtls_dgram(now, &hello_request);
        assert_eq!(a.state(), ConnectionState::SslHandshakeConnect);

        a.add_dtls_dgram(now, &hello_request);
        assert_eq!(a.state(), ConnectionState::SslHandshakeConnect);

        h.update(now, &mut a);
        let sent = drain(&mut a);
        assert_eq!(sent.len(), 1);
        assert_eq!(client_hello_message_seq(&sent[0]), Some(0));
    }

    #[test]
    fn stateful_handshake_and_data() {
        let _ = env_logger::try_init();

        let mut h = Harness::new();
        let now = Instant::now();
        let addr_a = addr("10.0.0.2:2000");
        let addr_b = addr("10.0.0.1:1000");

        let mut a = h.initiator(now, addr_b);
        let mut b = h.responder(now, addr_a);

        a.queue_send(b"queued before established");

        // The cookie exchange ClientHello is answered by the driver, not b.
        h.update(now, &mut a);
        drain(&mut a);

        h.update(now, &mut b);
        deliver(now, &mut b, &mut a);
        assert_eq!(a.state(), ConnectionState::SslHandshakeConnect);

        for _ in 0..20 {
            h.update(now, &mut a);
            deliver(now, &mut a, &mut b);
            h.update(now, &mut b);
            deliver(now, &mut b, &mut a);

            if a.state() == ConnectionState::Established
                && b.state() == ConnectionState::Established
            {
                break;
            }
        }

        assert_eq!(a.state(), ConnectionState::Established);
        assert_eq!(b.state(), ConnectionState::Established);

        h.update(now, &mut a);
        deliver(now, &mut a, &mut b);
        h.update(now, &mut b);

        assert_eq!(
            h.inbound.pop_front(),
            Some((addr_a, b"queued before established".to_vec()))
        );

        // Established connections are exempt from the timeout.
        let later = now + TIMEOUT * 2;
        h.update(later, &mut a);
        assert_eq!(a.state(), ConnectionState::Established);

        a.disconnect(later);
        assert!(a.is_disconnected());
        deliver(later, &mut a, &mut b);
        h.update(later, &mut b);
        assert!(b.is_disconnected());
        assert!(b.error().is_none());
    }
}
