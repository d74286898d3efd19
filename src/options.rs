use crate::{CapacityKind, Error};

/// Bytes of DER reserved for the signature. The `/Contents` placeholder is
/// twice as wide, since the signature is hex encoded.
///
/// 16 KiB holds an RSA-4096 signature with a few chain certificates.
pub const DEFAULT_SIGNATURE_CAPACITY: usize = 16 * 1024;

/// Largest accepted signature capacity, 16 MiB of DER.
pub const MAX_SIGNATURE_CAPACITY: usize = 16 * 1024 * 1024;

/// Written in `/Reason` when the caller doesn't provide one.
pub const DEFAULT_REASON: &str = "Digitally signed";

/// Options for a signing call.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// DER bytes reserved for the signature.
    pub signature_capacity: usize,
    /// Certify the document with DocMDP, forbidding any further change.
    pub lock: bool,
    pub reason: String,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    /// Overrides the `/Name` entry, which defaults to the signer's common
    /// name.
    pub name: Option<String>,
    /// Partial name of the new signature field. When absent, the first free
    /// `SignatureN` is used.
    pub field_name: Option<String>,
    /// Re-parse the signed output and check its `/ByteRange` before
    /// returning it.
    pub verify_output: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            signature_capacity: DEFAULT_SIGNATURE_CAPACITY,
            lock: false,
            reason: DEFAULT_REASON.to_string(),
            location: None,
            contact_info: None,
            name: None,
            field_name: None,
            verify_output: true,
        }
    }
}

impl SignOptions {
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_contact_info(mut self, contact_info: impl Into<String>) -> Self {
        self.contact_info = Some(contact_info.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn with_signature_capacity(mut self, bytes: usize) -> Self {
        self.signature_capacity = bytes;
        self
    }

    pub fn with_output_verification(mut self, verify_output: bool) -> Self {
        self.verify_output = verify_output;
        self
    }

    /// Number of hex digits between the `/Contents` delimiters. Fails when
    /// the capacity is above [`MAX_SIGNATURE_CAPACITY`].
    pub(crate) fn contents_width(&self) -> Result<usize, Error> {
        if self.signature_capacity > MAX_SIGNATURE_CAPACITY {
            return Err(Error::Capacity {
                kind: CapacityKind::SignatureContainer,
                needed: self.signature_capacity,
                available: MAX_SIGNATURE_CAPACITY,
            });
        }
        Ok(self.signature_capacity * 2)
    }
}
