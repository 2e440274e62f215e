//! Self-signed identity used when no certificate is configured.

use std::fmt;

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};

use crate::Error;

/// PEM encoded certificate and private key.
#[derive(Clone)]
pub struct Identity {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl Identity {
    /// Generate a fresh ECDSA P-256 certificate valid for one year.
    pub fn generate_self_signed() -> Result<Self, Error> {
        let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)?;

        let mut params = CertificateParams::new(vec!["DTLS Peer".to_string()]);

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::OrganizationName, "DTLS".to_string());
        distinguished_name.push(DnType::CommonName, "DTLS Peer".to_string());
        params.distinguished_name = distinguished_name;

        params.is_ca = IsCa::NoCa;
        params.key_pair = Some(key_pair);

        let not_before = time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::days(365);

        let cert = RcgenCertificate::from_params(params)?;

        Ok(Identity {
            certificate: cert.serialize_pem()?.into_bytes(),
            private_key: cert.serialize_private_key_pem().into_bytes(),
        })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &self.certificate.len())
            .field("private_key", &self.private_key.len())
            .finish()
    }
}

/// SHA-256 fingerprint of a DER certificate as colon separated hex.
///
/// Example: "AF:12:F6:..."
pub fn fingerprint(cert_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}
