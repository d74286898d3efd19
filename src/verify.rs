//! Structural self-check of a freshly signed document.
//!
//! The signed bytes are parsed again from scratch and the signature
//! dictionary is checked the way a validator would see it: the
//! `/ByteRange` must be the one we computed, cover the file from its first
//! byte to its `%%EOF`, and skip exactly the `/Contents` hex string.

use std::ops::Range;

use lopdf::{xref::XrefEntry, Document, ObjectId};
use regex::bytes::Regex;

use crate::{Error, ExactArrayOrNone};

pub(crate) fn check_signed_output(
    pdf_bytes: &[u8],
    signature_id: ObjectId,
    expected_range: [usize; 4],
) -> Result<[Range<usize>; 2], Error> {
    let doc = Document::load_mem(pdf_bytes)
        .map_err(|err| Error::structural(format!("signed output does not parse back: {err}")))?;
    let signature = doc
        .get_dictionary(signature_id)
        .map_err(|_| Error::structural("signature dictionary missing from the signed output"))?;

    let signed_range = signature
        .get_deref(b"ByteRange", &doc)?
        .as_array()?
        .iter()
        .map(|r| doc.dereference(r).and_then(|(_, r)| r.as_i64()))
        .collect::<lopdf::Result<ExactArrayOrNone<i64, 4>>>()?
        .0
        .ok_or(lopdf::Error::Type)?;

    // Sanity check that the range is well formed and inside the document.
    if signed_range.iter().any(|&r| r < 0) {
        return Err(Error::structural("negative /ByteRange value"));
    }
    let signed_range = signed_range.map(|r| r as usize);
    if signed_range != expected_range {
        return Err(Error::structural(format!(
            "/ByteRange reads back as {signed_range:?} instead of {expected_range:?}"
        )));
    }

    let [start, skip_start, skip_end, tail_len] = signed_range;
    if start != 0 {
        return Err(Error::structural("signature does not cover the file from the beginning"));
    }
    if skip_start > skip_end || skip_end + tail_len != pdf_bytes.len() {
        return Err(Error::structural("signature range does not cover the whole file"));
    }

    // The signature object must be inside the signed range.
    match doc.reference_table.get(signature_id.0) {
        Some(XrefEntry::Normal { offset, .. }) if (*offset as usize) < skip_start => {}
        _ => return Err(Error::structural("signature dictionary lies outside the signed range")),
    }

    // The skipped bytes must be exactly the /Contents hex string.
    let skipped_bytes = decode_pdf_hex_string(&pdf_bytes[skip_start..skip_end])
        .ok_or_else(|| Error::structural("skipped range is not a hex string"))?;
    let contents = signature.get_deref(b"Contents", &doc)?.as_str()?;
    if contents != skipped_bytes {
        return Err(Error::structural("skipped range does not match /Contents"));
    }

    if !pdf_ends_with_eof(pdf_bytes) {
        return Err(Error::structural("signed output does not end with %%EOF"));
    }

    Ok([0..skip_start, skip_end..pdf_bytes.len()])
}

/// Decodes a PDF hex string, including the delimiters '<' and '>'.
///
/// Returns None if the string doesn't match the pattern "^<[0-9A-Fa-f]*>$".
fn decode_pdf_hex_string(hex_input: &[u8]) -> Option<Vec<u8>> {
    // First and last characters must be the delimiters '<' and '>'.
    if hex_input.first() != Some(&b'<') || hex_input.last() != Some(&b'>') {
        return None;
    }
    let hex_input = &hex_input[1..hex_input.len() - 1];

    let mut bytes = Vec::with_capacity(hex_input.len() / 2 + 1);
    let mut hex_iter = hex_input.iter().map(|&b| (b as char).to_digit(16));

    while let Some(first) = hex_iter.next() {
        let first = first? as u8;
        let second = hex_iter.next().unwrap_or(Some(0))? as u8;
        bytes.push(first << 4 | second);
    }

    Some(bytes)
}

lazy_static::lazy_static! {
    static ref EOF_REGEX: Regex = Regex::new(r"(?:\r\n|\r|\n)%%EOF[ \t]*(?:\r\n|\r|\n)?$").unwrap();
}

/// Tests if the PDF ends with the %%EOF marker.
fn pdf_ends_with_eof(pdf_bytes: &[u8]) -> bool {
    EOF_REGEX.is_match(pdf_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sign_pdf, test_support, ErrorKind, SignOptions};

    /// A signed document, the id of its signature dictionary and its byte
    /// range.
    fn signed_sample() -> (Vec<u8>, ObjectId, [usize; 4]) {
        let identity = test_support::identity("Self Check");
        let options = SignOptions::default().with_signature_capacity(4096);
        let signed = sign_pdf(&test_support::sample_pdf(1), &identity, None, options).unwrap();

        let doc = Document::load_mem(&signed).unwrap();
        let form = doc
            .catalog()
            .unwrap()
            .get_deref(b"AcroForm", &doc)
            .unwrap()
            .as_dict()
            .unwrap();
        let field_id = form.get(b"Fields").unwrap().as_array().unwrap()[0]
            .as_reference()
            .unwrap();
        let signature_id = doc
            .get_dictionary(field_id)
            .unwrap()
            .get(b"V")
            .unwrap()
            .as_reference()
            .unwrap();
        let range: Vec<usize> = doc
            .get_dictionary(signature_id)
            .unwrap()
            .get(b"ByteRange")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap() as usize)
            .collect();

        (signed, signature_id, [range[0], range[1], range[2], range[3]])
    }

    #[test]
    fn accepts_a_fresh_signature() {
        let (signed, signature_id, range) = signed_sample();
        let spans = check_signed_output(&signed, signature_id, range).unwrap();
        assert_eq!(spans, [0..range[1], range[2]..signed.len()]);
    }

    #[test]
    fn rejects_an_unexpected_range() {
        let (signed, signature_id, range) = signed_sample();
        let shifted = [range[0], range[1] + 1, range[2], range[3]];

        let err = check_signed_output(&signed, signature_id, shifted).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn rejects_a_damaged_container() {
        let (mut signed, signature_id, range) = signed_sample();
        // First hex digit after '<'.
        signed[range[1] + 1] = b'X';

        let err = check_signed_output(&signed, signature_id, range).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn rejects_a_missing_signature_object() {
        let (signed, _, range) = signed_sample();

        let err = check_signed_output(&signed, (9999, 0), range).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn hex_strings() {
        assert_eq!(decode_pdf_hex_string(b"<CAFE>"), Some(vec![0xCA, 0xFE]));
        assert_eq!(decode_pdf_hex_string(b"<caf>"), Some(vec![0xCA, 0xF0]));
        assert_eq!(decode_pdf_hex_string(b"<>"), Some(vec![]));
        assert_eq!(decode_pdf_hex_string(b"CAFE"), None);
        assert_eq!(decode_pdf_hex_string(b"<CAFG>"), None);
    }

    #[test]
    fn eof_marker() {
        assert!(pdf_ends_with_eof(b"trailer\n%%EOF\n"));
        assert!(pdf_ends_with_eof(b"trailer\r\n%%EOF"));
        assert!(!pdf_ends_with_eof(b"trailer\n%%EOF\nextra"));
    }
}
