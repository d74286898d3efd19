use std::fmt;

use chrono::{DateTime, Utc};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::{X509NameRef, X509};

use crate::{cms, DetachedSigner, Error};

/// Private key and certificates used to sign.
///
/// The chain holds the certificates between the leaf and the root, leaf
/// adjacent first. The root itself is usually left out.
pub struct SigningIdentity {
    key: PKey<Private>,
    certificate: X509,
    chain: Vec<X509>,
}

impl SigningIdentity {
    /// Fails if the key is not RSA, or does not belong to the certificate.
    pub fn new(key: PKey<Private>, certificate: X509, chain: Vec<X509>) -> Result<Self, Error> {
        if key.id() != Id::RSA {
            return Err(Error::UnsupportedKey);
        }
        if !certificate.public_key()?.public_eq(&key) {
            return Err(Error::KeyMismatch);
        }

        Ok(Self {
            key,
            certificate,
            chain,
        })
    }

    /// Loads the identity from PEM encoded parts. `chain_pem` may be empty or
    /// hold any number of concatenated certificates.
    pub fn from_pem(key_pem: &[u8], certificate_pem: &[u8], chain_pem: &[u8]) -> Result<Self, Error> {
        let key = PKey::private_key_from_pem(key_pem)?;
        let certificate = X509::from_pem(certificate_pem)?;
        let chain = if chain_pem.iter().all(u8::is_ascii_whitespace) {
            Vec::new()
        } else {
            X509::stack_from_pem(chain_pem)?
        };

        Self::new(key, certificate, chain)
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    /// Common name from the leaf certificate subject.
    pub fn common_name(&self) -> Option<String> {
        common_name(self.certificate.subject_name())
    }
}

impl DetachedSigner for SigningIdentity {
    fn sign_digest(&self, digest: &[u8; 32], signing_time: DateTime<Utc>) -> Result<Vec<u8>, Error> {
        cms::build_signed_data(
            &self.key,
            &self.certificate,
            &self.chain,
            digest,
            signing_time,
        )
    }

    fn signer_name(&self) -> Option<String> {
        self.common_name()
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &self.common_name())
            .field("key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

/// First common name entry of a distinguished name.
pub(crate) fn common_name(name: &X509NameRef) -> Option<String> {
    let entry = name.entries_by_nid(Nid::COMMONNAME).next()?;
    entry.data().as_utf8().ok().map(|cn| cn.to_string())
}
