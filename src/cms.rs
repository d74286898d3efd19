//! Digest and detached CMS `SignedData` construction.
//!
//! The structure is assembled by hand, as it is small and fixed:
//!
//! ```text
//! ContentInfo {
//!   contentType: id-signedData,
//!   content: SignedData {
//!     version: 1,
//!     digestAlgorithms: { SHA-256 },
//!     encapContentInfo: { id-data },        -- detached, no eContent
//!     certificates: [0] { leaf, chain... },
//!     signerInfos: { SignerInfo {
//!       version: 1,
//!       sid: IssuerAndSerialNumber(leaf),
//!       digestAlgorithm: SHA-256,
//!       signedAttrs: [0] { contentType, signingTime, messageDigest },
//!       signatureAlgorithm: rsaEncryption,
//!       signature: RSA PKCS #1 v1.5 over DER(signedAttrs)
//!     } }
//!   }
//! }
//! ```

use chrono::{DateTime, Datelike, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Private};
use openssl::sha::Sha256;
use openssl::sign::Signer;
use openssl::x509::{X509Ref, X509};

use crate::{CapacityKind, Error};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_UTC_TIME: u8 = 0x17;
const TAG_GENERALIZED_TIME: u8 = 0x18;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_CONTEXT_0: u8 = 0xA0;

const OID_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x01]; // 1.2.840.113549.1.7.1
const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02]; // 1.2.840.113549.1.7.2
const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03]; // 1.2.840.113549.1.9.3
const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04]; // 1.2.840.113549.1.9.4
const OID_SIGNING_TIME: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x05]; // 1.2.840.113549.1.9.5
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01]; // 2.16.840.1.101.3.4.2.1
const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01]; // 1.2.840.113549.1.1.1

/// SHA-256 over the signed spans, without joining them.
pub fn digest_spans(spans: [&[u8]; 2]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for span in spans {
        hasher.update(span);
    }
    hasher.finish()
}

/// Builds the DER encoded `ContentInfo` of a detached signature over content
/// whose SHA-256 digest is `digest`.
pub fn build_signed_data(
    key: &PKeyRef<Private>,
    certificate: &X509Ref,
    chain: &[X509],
    digest: &[u8; 32],
    signing_time: DateTime<Utc>,
) -> Result<Vec<u8>, Error> {
    let signed_attrs = build_signed_attrs(digest, signing_time);

    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(&signed_attrs)?;
    let signature = signer.sign_to_vec()?;

    let signer_info = build_signer_info(certificate, &signed_attrs, &signature)?;

    // The leaf goes first; readers take the first certificate as the signer.
    let mut certificates = certificate.to_der()?;
    for cert in chain {
        certificates.extend_from_slice(&cert.to_der()?);
    }

    let mut signed_data = Vec::with_capacity(certificates.len() + signer_info.len() + 64);
    signed_data.extend_from_slice(&[TAG_INTEGER, 0x01, 0x01]);
    write_tag_length_value(&mut signed_data, TAG_SET, &algorithm_identifier(OID_SHA256));
    write_tag_length_value(&mut signed_data, TAG_SEQUENCE, &tlv(TAG_OID, OID_DATA));
    write_tag_length_value(&mut signed_data, TAG_CONTEXT_0, &certificates);
    write_tag_length_value(&mut signed_data, TAG_SET, &signer_info);

    let mut content_info = tlv(TAG_OID, OID_SIGNED_DATA);
    write_tag_length_value(&mut content_info, TAG_CONTEXT_0, &tlv(TAG_SEQUENCE, &signed_data));

    Ok(tlv(TAG_SEQUENCE, &content_info))
}

/// Hex encodes the DER signature, right-padded with `0` up to the
/// `/Contents` interior width.
pub fn encode_contents(der: &[u8], interior_width: usize) -> Result<Vec<u8>, Error> {
    let mut hex = hex::encode_upper(der).into_bytes();
    if hex.len() > interior_width {
        return Err(Error::Capacity {
            kind: CapacityKind::SignatureContainer,
            needed: hex.len(),
            available: interior_width,
        });
    }
    hex.resize(interior_width, b'0');
    Ok(hex)
}

/// The signed attributes, encoded as a `SET OF`, which is what the signature
/// covers. Inside the `SignerInfo` the tag becomes `[0] IMPLICIT`.
fn build_signed_attrs(digest: &[u8; 32], signing_time: DateTime<Utc>) -> Vec<u8> {
    let mut attrs = [
        attribute(OID_CONTENT_TYPE, &tlv(TAG_OID, OID_DATA)),
        attribute(OID_SIGNING_TIME, &encode_time(signing_time)),
        attribute(OID_MESSAGE_DIGEST, &tlv(TAG_OCTET_STRING, digest)),
    ];
    // DER sorts SET OF members by their encoding.
    attrs.sort();

    tlv(TAG_SET, &attrs.concat())
}

fn build_signer_info(
    certificate: &X509Ref,
    signed_attrs: &[u8],
    signature: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut sid = certificate.issuer_name().to_der()?;
    let serial = certificate.serial_number().to_bn()?.to_vec();
    write_tag_length_value(&mut sid, TAG_INTEGER, &unsigned_integer(&serial));

    let mut inner = vec![TAG_INTEGER, 0x01, 0x01];
    write_tag_length_value(&mut inner, TAG_SEQUENCE, &sid);
    inner.extend_from_slice(&algorithm_identifier(OID_SHA256));

    let mut retagged = signed_attrs.to_vec();
    retagged[0] = TAG_CONTEXT_0;
    inner.extend_from_slice(&retagged);

    inner.extend_from_slice(&algorithm_identifier(OID_RSA_ENCRYPTION));
    write_tag_length_value(&mut inner, TAG_OCTET_STRING, signature);

    Ok(tlv(TAG_SEQUENCE, &inner))
}

/// SEQUENCE { OID, SET { value } }
fn attribute(oid: &[u8], value: &[u8]) -> Vec<u8> {
    let mut inner = tlv(TAG_OID, oid);
    write_tag_length_value(&mut inner, TAG_SET, value);
    tlv(TAG_SEQUENCE, &inner)
}

/// SEQUENCE { OID, NULL }
fn algorithm_identifier(oid: &[u8]) -> Vec<u8> {
    let mut inner = tlv(TAG_OID, oid);
    inner.extend_from_slice(&[TAG_NULL, 0x00]);
    tlv(TAG_SEQUENCE, &inner)
}

/// UTCTime until 2049, GeneralizedTime afterwards (RFC 5652 §11.3).
fn encode_time(time: DateTime<Utc>) -> Vec<u8> {
    if time.year() < 2050 {
        tlv(TAG_UTC_TIME, time.format("%y%m%d%H%M%SZ").to_string().as_bytes())
    } else {
        tlv(
            TAG_GENERALIZED_TIME,
            time.format("%Y%m%d%H%M%SZ").to_string().as_bytes(),
        )
    }
}

/// Content octets of a non-negative INTEGER given its big-endian magnitude.
fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let start = magnitude
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[start..];

    match trimmed.first() {
        None => vec![0],
        Some(&first) if first & 0x80 != 0 => [&[0][..], trimmed].concat(),
        Some(_) => trimmed.to_vec(),
    }
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.len() + 6);
    write_tag_length_value(&mut buf, tag, value);
    buf
}

/// Writes a DER TLV (tag-length-value) to a buffer.
fn write_tag_length_value(buf: &mut Vec<u8>, tag: u8, value: &[u8]) {
    buf.push(tag);
    let len = value.len();
    if len < 0x80 {
        buf.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        buf.push(0x80 | (bytes.len() - skip) as u8);
        buf.extend_from_slice(&bytes[skip..]);
    }
    buf.extend_from_slice(value);
}
