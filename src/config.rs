use std::time::Duration;

use crate::Error;

/// Upper bound for every configured interval.
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Driver configuration
#[derive(Clone)]
pub struct Config {
    certificate: Option<Vec<u8>>,
    private_key: Option<Vec<u8>>,
    ca_chain: Option<Vec<u8>>,
    require_client_certificate: bool,
    timeout: Duration,
    max_connections_per_ip: usize,
    cookie_rotation: Duration,
    hello_request_start_rto: Duration,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            certificate: None,
            private_key: None,
            ca_chain: None,
            require_client_certificate: false,
            timeout: Duration::from_secs(10),
            max_connections_per_ip: 8,
            cookie_rotation: Duration::from_secs(30),
            hello_request_start_rto: Duration::from_millis(500),
        }
    }

    /// PEM encoded certificate presented to peers.
    ///
    /// When neither this nor [`Config::private_key`] is set, an ephemeral
    /// self-signed certificate is generated when the driver starts.
    #[inline(always)]
    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }

    /// PEM encoded private key belonging to [`Config::certificate`].
    #[inline(always)]
    pub fn private_key(&self) -> Option<&[u8]> {
        self.private_key.as_deref()
    }

    /// PEM bundle of trusted CA certificates.
    ///
    /// When set, peer certificates are verified against these. When unset,
    /// any peer certificate is accepted.
    #[inline(always)]
    pub fn ca_chain(&self) -> Option<&[u8]> {
        self.ca_chain.as_deref()
    }

    /// Fail handshakes where the initiating peer presents no certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// Time a connection may spend handshaking before it is dropped.
    ///
    /// Also the retry deadline of an initiator's handshake.
    #[inline(always)]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Max number of live connections per remote IP address.
    ///
    /// Cookie-verified ClientHellos beyond this are dropped.
    #[inline(always)]
    pub fn max_connections_per_ip(&self) -> usize {
        self.max_connections_per_ip
    }

    /// Lifetime of a cookie secret before it is rotated.
    #[inline(always)]
    pub fn cookie_rotation(&self) -> Duration {
        self.cookie_rotation
    }

    /// First retransmit interval of the responder's HelloRequest.
    ///
    /// Doubled after every retransmit.
    #[inline(always)]
    pub fn hello_request_start_rto(&self) -> Duration {
        self.hello_request_start_rto
    }
}

/// Builder for driver configuration.
pub struct ConfigBuilder {
    certificate: Option<Vec<u8>>,
    private_key: Option<Vec<u8>>,
    ca_chain: Option<Vec<u8>>,
    require_client_certificate: bool,
    timeout: Duration,
    max_connections_per_ip: usize,
    cookie_rotation: Duration,
    hello_request_start_rto: Duration,
}

impl ConfigBuilder {
    /// Set the PEM encoded certificate.
    ///
    /// Must be paired with [`ConfigBuilder::private_key`].
    pub fn certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.certificate = Some(pem.into());
        self
    }

    /// Set the PEM encoded private key.
    ///
    /// Must be paired with [`ConfigBuilder::certificate`].
    pub fn private_key(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.private_key = Some(pem.into());
        self
    }

    /// Set a PEM bundle of trusted CA certificates.
    pub fn ca_chain(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_chain = Some(pem.into());
        self
    }

    /// Require initiating peers to present a certificate.
    ///
    /// Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Set the handshake timeout.
    ///
    /// Defaults to 10 seconds. At most one day.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the max number of connections per remote IP.
    ///
    /// Defaults to 8.
    pub fn max_connections_per_ip(mut self, max: usize) -> Self {
        self.max_connections_per_ip = max;
        self
    }

    /// Set the cookie secret rotation window.
    ///
    /// Defaults to 30 seconds.
    pub fn cookie_rotation(mut self, rotation: Duration) -> Self {
        self.cookie_rotation = rotation;
        self
    }

    /// Set the first HelloRequest retransmit interval.
    ///
    /// Defaults to 500 milliseconds. At most one day.
    pub fn hello_request_start_rto(mut self, rto: Duration) -> Self {
        self.hello_request_start_rto = rto;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` if only one of certificate and private key
    /// is set.
    pub fn build(self) -> Result<Config, Error> {
        match (&self.certificate, &self.private_key) {
            (Some(_), None) => {
                return Err(Error::Config(
                    "Certificate set without a private key".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "Private key set without a certificate".to_string(),
                ))
            }
            _ => {}
        }

        if self.hello_request_start_rto.is_zero() {
            return Err(Error::Config(
                "HelloRequest retransmit interval must be positive".to_string(),
            ));
        }

        for (name, interval) in [
            ("Handshake timeout", self.timeout),
            ("Cookie rotation", self.cookie_rotation),
            ("HelloRequest retransmit interval", self.hello_request_start_rto),
        ] {
            if interval > MAX_INTERVAL {
                return Err(Error::Config(format!(
                    "{} {:?} exceeds {:?}",
                    name, interval, MAX_INTERVAL
                )));
            }
        }

        Ok(Config {
            certificate: self.certificate,
            private_key: self.private_key,
            ca_chain: self.ca_chain,
            require_client_certificate: self.require_client_certificate,
            timeout: self.timeout,
            max_connections_per_ip: self.max_connections_per_ip,
            cookie_rotation: self.cookie_rotation,
            hello_request_start_rto: self.hello_request_start_rto,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
