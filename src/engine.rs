//! The SSL engine of a single connection.
//!
//! OpenSSL does the DTLS handshake and record protection. It never touches
//! a socket: ciphertext is handed to it one datagram at a time and whatever
//! it writes accumulates in a byte buffer the connection drains and frames.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::mem;

use openssl::pkey::PKey;
use openssl::ssl::{
    ErrorCode, ShutdownResult, Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions,
    SslStream, SslVerifyMode,
};
use openssl::x509::X509;

use crate::certificate::{fingerprint, Identity};
use crate::{Config, Error};

// The one suite offered and accepted. Requires an ECDSA certificate.
const DTLS_CIPHER: &str = "ECDHE-ECDSA-AES128-GCM-SHA256";

/// Datagram queue between the connection and OpenSSL.
#[derive(Default)]
struct Bridge {
    /// Ciphertext datagrams waiting to be read by the engine.
    incoming: VecDeque<Vec<u8>>,
    /// Everything the engine has written, records back to back.
    outgoing: Vec<u8>,
}

impl Read for Bridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(data) = self.incoming.pop_front() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

impl Write for Bridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Which side of the handshake the engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accept a handshake (responder).
    Server,
    /// Initiate a handshake (initiator).
    Client,
}

/// Result of advancing the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Complete,
    WouldBlock,
}

pub struct Engine {
    stream: SslStream<Bridge>,
}

impl Engine {
    pub fn new(context: &SslContext, mtu: u32, mode: Mode) -> Result<Self, Error> {
        let mut ssl = Ssl::new(context)?;
        ssl.set_mtu(mtu)?;

        match mode {
            Mode::Server => ssl.set_accept_state(),
            Mode::Client => ssl.set_connect_state(),
        }

        let stream = SslStream::new(ssl, Bridge::default())?;

        Ok(Engine { stream })
    }

    /// Queue one ciphertext datagram for the engine.
    pub fn push_input(&mut self, datagram: &[u8]) {
        self.stream.get_mut().incoming.push_back(datagram.to_vec());
    }

    /// Take everything the engine has written since the last call.
    pub fn take_output(&mut self) -> Vec<u8> {
        mem::take(&mut self.stream.get_mut().outgoing)
    }

    /// Advance the handshake as far as the queued input allows.
    pub fn handshake(&mut self) -> Result<Step, Error> {
        match self.stream.do_handshake() {
            Ok(()) => Ok(Step::Complete),
            Err(e) if would_block(e.code()) => Ok(Step::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Read one plaintext record. `None` when no more can be read right now.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Err(Error::Closed),
            Err(e) if would_block(e.code()) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Encrypt `data` as a single record. Returns false if the engine can't
    /// take it right now.
    pub fn write(&mut self, data: &[u8]) -> Result<bool, Error> {
        match self.stream.ssl_write(data) {
            Ok(_) => Ok(true),
            Err(e) if would_block(e.code()) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a close_notify alert.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        match self.stream.shutdown() {
            Ok(ShutdownResult::Sent) | Ok(ShutdownResult::Received) => Ok(()),
            Err(e) if would_block(e.code()) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fingerprint of the peer's certificate, once it has sent one.
    pub fn peer_fingerprint(&self) -> Option<String> {
        let cert = self.stream.ssl().peer_certificate()?;
        let der = cert.to_der().ok()?;
        Some(fingerprint(&der))
    }
}

fn would_block(code: ErrorCode) -> bool {
    code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE
}

/// Build the SSL context shared by every connection of a driver.
pub fn build_context(config: &Config) -> Result<SslContext, Error> {
    let mut ctx = SslContextBuilder::new(SslMethod::dtls())?;

    ctx.set_cipher_list(DTLS_CIPHER)?;

    let mut options = SslOptions::empty();
    options.insert(SslOptions::SINGLE_ECDH_USE);
    options.insert(SslOptions::NO_DTLSV1);
    options.insert(SslOptions::NO_QUERY_MTU);
    ctx.set_options(options);

    let identity = match (config.certificate(), config.private_key()) {
        (Some(certificate), Some(private_key)) => Identity {
            certificate: certificate.to_vec(),
            private_key: private_key.to_vec(),
        },
        _ => {
            let identity = Identity::generate_self_signed()?;
            debug!("Generated ephemeral certificate");
            identity
        }
    };

    let x509 = X509::from_pem(&identity.certificate)?;
    let pkey = PKey::private_key_from_pem(&identity.private_key)?;
    ctx.set_certificate(&x509)?;
    ctx.set_private_key(&pkey)?;
    ctx.check_private_key()?;

    info!("Local certificate {}", fingerprint(&x509.to_der()?));

    let mut mode = SslVerifyMode::empty();
    mode.insert(SslVerifyMode::PEER);
    if config.require_client_certificate() {
        mode.insert(SslVerifyMode::FAIL_IF_NO_PEER_CERT);
    }

    if let Some(ca_chain) = config.ca_chain() {
        for cert in X509::stack_from_pem(ca_chain)? {
            ctx.cert_store_mut().add_cert(cert)?;
        }
        ctx.set_verify(mode);
    } else {
        // No trust anchors, any peer certificate is accepted.
        ctx.set_verify_callback(mode, |_ok, _ctx| true);
    }

    Ok(ctx.build())
}
