#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod byte_range;
pub mod cms;
mod identity;
pub mod inspect;
mod options;
mod placement;
mod signer;
mod stamp;
mod text;
mod verify;

#[cfg(test)]
mod test_support;

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use byte_range::{Placeholder, PlaceholderLocator, TextualLocator, BYTE_RANGE_SENTINEL};
pub use identity::SigningIdentity;
pub use inspect::{inspect_signatures, ExistingSignature, SignerLabel};
pub use options::{
    SignOptions, DEFAULT_REASON, DEFAULT_SIGNATURE_CAPACITY, MAX_SIGNATURE_CAPACITY,
};
pub use placement::{Rect, VisualPlacement};
pub use signer::{sign_pdf, Signer};

#[derive(Error, Debug)]
pub enum Error {
    #[error("PDF object model error")]
    Pdf(#[from] lopdf::Error),
    #[error("unexpected document structure: {0}")]
    Structural(String),
    #[error("{kind} needs {needed} bytes but only {available} are reserved")]
    Capacity {
        kind: CapacityKind,
        needed: usize,
        available: usize,
    },
    #[error("openssl error")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error("private key does not match the signing certificate")]
    KeyMismatch,
    #[error("only RSA keys are supported for signing")]
    UnsupportedKey,
    #[error("invalid stamp image")]
    Image(#[from] image::ImageError),
    #[error("failed to serialize the document")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Coarse classification, so callers can tell the failure families apart
    /// without matching every variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Structural(_) => ErrorKind::Structural,
            Error::Capacity { .. } => ErrorKind::Capacity,
            Error::Crypto(_) | Error::KeyMismatch | Error::UnsupportedKey => ErrorKind::Crypto,
            Error::Pdf(_) | Error::Image(_) | Error::Io(_) => ErrorKind::Document,
        }
    }

    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        Error::Structural(msg.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Placeholder markers missing or duplicated, or the document is not
    /// laid out as expected.
    Structural,
    /// A reserved slot was too small for what had to be written in it.
    Capacity,
    /// Key, certificate or signature computation failure.
    Crypto,
    /// The document (or stamp image) could not be loaded or saved.
    Document,
}

/// Which reserved region overflowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityKind {
    SignatureContainer,
    ByteRangeSlot,
}

impl fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityKind::SignatureContainer => f.write_str("signature container"),
            CapacityKind::ByteRangeSlot => f.write_str("byte range slot"),
        }
    }
}

/// Source of the detached PKCS #7 signature embedded in the document.
///
/// [`SigningIdentity`] is the OpenSSL implementation. Hardware tokens or
/// remote signers can implement this trait instead, as long as they return
/// a DER encoded `ContentInfo` wrapping a detached `SignedData`.
pub trait DetachedSigner {
    /// Signs content whose SHA-256 digest is `digest`.
    ///
    /// The returned DER must carry `digest` as its message-digest
    /// authenticated attribute.
    fn sign_digest(&self, digest: &[u8; 32], signing_time: DateTime<Utc>) -> Result<Vec<u8>, Error>;

    /// Name to write in the signature dictionary, when known.
    fn signer_name(&self) -> Option<String> {
        None
    }
}

impl<T: DetachedSigner + ?Sized> DetachedSigner for &T {
    fn sign_digest(&self, digest: &[u8; 32], signing_time: DateTime<Utc>) -> Result<Vec<u8>, Error> {
        (**self).sign_digest(digest, signing_time)
    }

    fn signer_name(&self) -> Option<String> {
        (**self).signer_name()
    }
}

struct ExactArrayOrNone<T, const N: usize>(Option<[T; N]>);

impl<T, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut iter = iter.into_iter();
        let result = array_init::from_iter(&mut iter);
        let result = if iter.next().is_none() { result } else { None };
        ExactArrayOrNone(result)
    }
}
