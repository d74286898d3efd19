//! Locates the signature placeholder inside a serialized document and
//! patches it in place.
//!
//! The signature dictionary is written with a `/ByteRange` made of sentinel
//! values and a `/Contents` hex string full of `0`. Once the document is
//! serialized, the real offsets can be found by scanning the bytes. Both
//! patches keep the exact byte length of what they replace, otherwise every
//! offset after them would move.

use std::ops::Range;

use log::debug;
use regex::bytes::Regex;

use crate::{CapacityKind, Error};

/// The 10-digit value used three times in the placeholder `/ByteRange`. Its
/// width bounds the offsets of any real file.
pub const BYTE_RANGE_SENTINEL: i64 = 9_999_999_999;

/// Hex digit filling the `/Contents` placeholder.
pub const CONTENTS_FILLER: u8 = b'0';

lazy_static::lazy_static! {
    static ref SENTINEL_REGEX: Regex = Regex::new(&format!(
        r"\[\s*0\s+{s}\s+{s}\s+{s}\s*\]",
        s = BYTE_RANGE_SENTINEL
    ))
    .unwrap();
    static ref CONTENTS_KEY_REGEX: Regex = Regex::new(r"/Contents").unwrap();
}

/// Position of the placeholder in a serialized document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// The sentinel `/ByteRange` array, brackets included.
    pub byte_range_slot: Range<usize>,
    /// The `/Contents` hex string, delimiters `<` and `>` included.
    pub contents: Range<usize>,
}

impl Placeholder {
    /// `[0, open, close + 1, rest]`: everything but the hex string.
    pub fn byte_range(&self, file_len: usize) -> [usize; 4] {
        [
            0,
            self.contents.start,
            self.contents.end,
            file_len - self.contents.end,
        ]
    }

    /// The two spans covered by the signature.
    pub fn signed_spans<'a>(&self, pdf_bytes: &'a [u8]) -> [&'a [u8]; 2] {
        [
            &pdf_bytes[..self.contents.start],
            &pdf_bytes[self.contents.end..],
        ]
    }

    /// Hex digits available between the delimiters.
    pub fn interior_width(&self) -> usize {
        self.contents.len() - 2
    }

    /// Checks that both ranges lie inside `pdf_bytes`, don't overlap, and
    /// that `contents` is delimited by `<` and `>`.
    pub fn check_bounds(&self, pdf_bytes: &[u8]) -> Result<(), Error> {
        let len = pdf_bytes.len();
        let contents = &self.contents;
        let slot = &self.byte_range_slot;

        if contents.start > contents.end || contents.end > len || contents.len() < 2 {
            return Err(Error::structural(format!(
                "/Contents placeholder {contents:?} is out of bounds for {len} bytes"
            )));
        }
        if pdf_bytes[contents.start] != b'<' || pdf_bytes[contents.end - 1] != b'>' {
            return Err(Error::structural("/Contents placeholder is not a hex string"));
        }
        if slot.start > slot.end || slot.end > len {
            return Err(Error::structural(format!(
                "/ByteRange slot {slot:?} is out of bounds for {len} bytes"
            )));
        }
        if slot.start < contents.end && contents.start < slot.end {
            return Err(Error::structural("/ByteRange slot overlaps /Contents"));
        }

        Ok(())
    }

    fn interior(&self) -> Range<usize> {
        self.contents.start + 1..self.contents.end - 1
    }
}

/// Finds the placeholder in the serialized bytes.
///
/// A PDF writer able to report object offsets directly can implement this
/// instead of relying on the textual scan.
pub trait PlaceholderLocator {
    /// `contents_width` is the number of hex digits reserved inside the
    /// `/Contents` delimiters.
    fn locate(&self, pdf_bytes: &[u8], contents_width: usize) -> Result<Placeholder, Error>;
}

/// Finds the placeholder by scanning for its textual markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualLocator;

impl PlaceholderLocator for TextualLocator {
    fn locate(&self, pdf_bytes: &[u8], contents_width: usize) -> Result<Placeholder, Error> {
        let mut matches = SENTINEL_REGEX.find_iter(pdf_bytes);
        let byte_range_slot = match (matches.next(), matches.next()) {
            (Some(m), None) => m.range(),
            (None, _) => return Err(Error::structural("/ByteRange placeholder not found")),
            (Some(_), Some(_)) => {
                return Err(Error::structural("/ByteRange placeholder is not unique"))
            }
        };

        let contents = find_contents(pdf_bytes, byte_range_slot.start, contents_width)
            .ok_or_else(|| {
                Error::structural(format!(
                    "no /Contents placeholder of {contents_width} hex digits found"
                ))
            })?;

        debug!(
            "placeholder found: /ByteRange at {:?}, /Contents at {:?}",
            byte_range_slot, contents
        );

        Ok(Placeholder {
            byte_range_slot,
            contents,
        })
    }
}

/// Looks for the `/Contents` key nearest before `anchor` whose value is the
/// placeholder, then after it if the writer reordered the keys.
fn find_contents(pdf_bytes: &[u8], anchor: usize, width: usize) -> Option<Range<usize>> {
    // End offsets of every key, i.e. where its value starts.
    let keys: Vec<usize> = CONTENTS_KEY_REGEX
        .find_iter(pdf_bytes)
        .map(|m| m.end())
        .collect();
    let split = keys.partition_point(|&value| value <= anchor);

    keys[..split]
        .iter()
        .rev()
        .chain(&keys[split..])
        .find_map(|&value| hex_placeholder_at(pdf_bytes, value, width))
}

/// Returns the hex string starting at `value` if it is an untouched
/// placeholder of `width` digits.
fn hex_placeholder_at(pdf_bytes: &[u8], value: usize, width: usize) -> Option<Range<usize>> {
    let open = value
        + pdf_bytes[value..]
            .iter()
            .position(|&b| !is_pdf_whitespace(b))?;
    if pdf_bytes[open] != b'<' || pdf_bytes.get(open + 1) == Some(&b'<') {
        // Not a hex string: an indirect reference, or a dictionary.
        return None;
    }

    let close = open + 1 + pdf_bytes[open + 1..].iter().position(|&b| b == b'>')?;
    let interior = &pdf_bytes[open + 1..close];
    if interior.len() != width || interior.iter().any(|&b| b != CONTENTS_FILLER) {
        return None;
    }

    Some(open..close + 1)
}

fn is_pdf_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\0')
}

/// Overwrites the sentinel `/ByteRange` with the real one, padded with
/// spaces to the same width. Returns the byte range written.
pub fn patch_byte_range(pdf_bytes: &mut [u8], placeholder: &Placeholder) -> Result<[usize; 4], Error> {
    placeholder.check_bounds(pdf_bytes)?;
    let range = placeholder.byte_range(pdf_bytes.len());
    let text = format!("[{} {} {} {}]", range[0], range[1], range[2], range[3]);

    let slot = &mut pdf_bytes[placeholder.byte_range_slot.clone()];
    if text.len() > slot.len() {
        return Err(Error::Capacity {
            kind: CapacityKind::ByteRangeSlot,
            needed: text.len(),
            available: slot.len(),
        });
    }
    slot.fill(b' ');
    slot[..text.len()].copy_from_slice(text.as_bytes());

    Ok(range)
}

/// Writes the hex encoded signature inside the `/Contents` delimiters. Any
/// remaining room keeps the `0` filler.
pub fn patch_contents(pdf_bytes: &mut [u8], placeholder: &Placeholder, hex: &[u8]) -> Result<(), Error> {
    placeholder.check_bounds(pdf_bytes)?;
    let interior = &mut pdf_bytes[placeholder.interior()];
    if hex.len() > interior.len() {
        return Err(Error::Capacity {
            kind: CapacityKind::SignatureContainer,
            needed: hex.len(),
            available: interior.len(),
        });
    }
    interior[..hex.len()].copy_from_slice(hex);
    interior[hex.len()..].fill(CONTENTS_FILLER);

    Ok(())
}
