use lopdf::{Object, StringFormat};

const UTF16_BOM: [u8; 2] = [0xFE, 0xFF];

/// Encodes a PDF text string: literal when ASCII, UTF-16BE with byte order
/// mark otherwise.
pub(crate) fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        return Object::string_literal(s);
    }

    let mut bytes = UTF16_BOM.to_vec();
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decodes a PDF text string object.
///
/// PDFDocEncoding is approximated by Latin-1, which only differs on a few
/// typographic characters.
pub(crate) fn decode_text_string(obj: &Object) -> Option<String> {
    let bytes = obj.as_str().ok()?;

    if let Some(utf16) = bytes.strip_prefix(&UTF16_BOM) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }

    Some(bytes.iter().map(|&b| b as char).collect())
}
