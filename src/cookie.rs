//! Stateless cookies for the DTLS cookie exchange.
//!
//! A cookie is `HMAC-SHA256(secret, peer address)`. The responder hands it
//! out in a HelloVerifyRequest and only allocates a connection once a peer
//! echoes a cookie that verifies. Nothing is stored per peer.
//!
//! The secret rotates every window. The replaced secret is kept as
//! `previous` for one more window so handshakes in flight across a rotation
//! still verify.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::message::Cookie;
use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of the cookies this driver issues and accepts.
pub const COOKIE_LENGTH: usize = 32;

const SECRET_LENGTH: usize = 32;

pub struct CookieSecret {
    current: Zeroizing<[u8; SECRET_LENGTH]>,
    previous: Zeroizing<[u8; SECRET_LENGTH]>,
    current_valid: bool,
    previous_valid: bool,
    last_generation: Option<Instant>,
    rotation: Duration,
}

impl CookieSecret {
    /// A secret without key material. The first [`CookieSecret::generate`]
    /// or [`CookieSecret::rotate`] seeds it.
    pub fn new(rotation: Duration) -> Self {
        CookieSecret {
            current: Zeroizing::new([0; SECRET_LENGTH]),
            previous: Zeroizing::new([0; SECRET_LENGTH]),
            current_valid: false,
            previous_valid: false,
            last_generation: None,
            rotation,
        }
    }

    /// Rotate the secret if `force` is set or the current one is older than
    /// the rotation window. Returns whether a rotation happened.
    pub fn rotate(&mut self, now: Instant, force: bool) -> Result<bool, Error> {
        let age = self
            .last_generation
            .map(|t| now.saturating_duration_since(t));

        let due = force || !self.current_valid || age.map_or(true, |a| a > self.rotation);
        if !due {
            return Ok(false);
        }

        let mut fresh = Zeroizing::new([0; SECRET_LENGTH]);
        OsRng.try_fill_bytes(&mut fresh[..])?;

        // The outgoing secret is only worth keeping if it has not already
        // outlived its extra window.
        let keep = self.current_valid && age.map_or(false, |a| a <= self.rotation * 2);

        let outgoing = std::mem::replace(&mut self.current, fresh);
        if keep {
            self.previous = outgoing;
        } else {
            self.previous.zeroize();
        }

        self.previous_valid = keep;
        self.current_valid = true;
        self.last_generation = Some(now);

        debug!("Rotated cookie secret, previous valid: {}", keep);

        Ok(true)
    }

    /// Sign `peer` with the current secret, rotating first if due.
    pub fn generate(&mut self, now: Instant, peer: &SocketAddr) -> Result<Cookie, Error> {
        self.rotate(now, false)?;

        let tag = keyed(&self.current[..], peer)?.finalize().into_bytes();
        if tag.len() > COOKIE_LENGTH {
            return Err(Error::CookieTooLong(tag.len()));
        }

        Cookie::try_new(&tag).map_err(|_| Error::CookieTooLong(tag.len()))
    }

    /// Check a cookie echoed by `peer` against the current secret, then the
    /// previous one while it is still within its window.
    pub fn verify(&self, now: Instant, peer: &SocketAddr, cookie: &[u8]) -> bool {
        if cookie.len() != COOKIE_LENGTH {
            return false;
        }

        if self.current_valid && matches(&self.current[..], peer, cookie) {
            return true;
        }

        let previous_live = self.previous_valid
            && self
                .last_generation
                .map_or(false, |t| now.saturating_duration_since(t) <= self.rotation);

        previous_live && matches(&self.previous[..], peer, cookie)
    }
}

fn keyed(secret: &[u8], peer: &SocketAddr) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(peer.to_string().as_bytes());
    Ok(mac)
}

fn matches(secret: &[u8], peer: &SocketAddr, cookie: &[u8]) -> bool {
    match keyed(secret, peer) {
        // verify_slice compares in constant time.
        Ok(mac) => mac.verify_slice(cookie).is_ok(),
        Err(_) => false,
    }
}
