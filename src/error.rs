use thiserror::Error;

/// Errors surfaced by the driver.
///
/// Per-datagram decode failures never reach the caller. They are logged and
/// the datagram is dropped. What remains here are setup failures and the
/// failures of individual connections' engines.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration, such as a certificate without its key.
    #[error("Config error: {0}")]
    Config(String),

    /// OpenSSL refused part of the context or connection setup.
    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    /// Fatal error from a connection's SSL engine.
    #[error("SSL error: {0}")]
    Ssl(#[from] openssl::ssl::Error),

    /// The peer closed the DTLS session.
    #[error("Peer closed the connection")]
    Closed,

    /// Ephemeral certificate generation failed.
    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::RcgenError),

    /// The OS random source is unavailable.
    #[error("Random error: {0}")]
    Random(#[from] rand::Error),

    #[error("Invalid HMAC key")]
    Hmac(#[from] hmac::digest::InvalidLength),

    /// A cookie did not fit the fixed cookie buffer.
    #[error("Cookie too long: {0}")]
    CookieTooLong(usize),

    /// A wire value could not be parsed.
    #[error("Parse error: {0:?}")]
    Parse(nom::error::ErrorKind),

    /// The wire value was cut short.
    #[error("Parse incomplete")]
    ParseIncomplete,
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::Parse(e.code),
        }
    }
}
