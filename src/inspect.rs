//! Lists the signature fields already present in a document.
//!
//! This is informational: whatever can't be decoded is reported as
//! [`SignerLabel::Unverified`] or with default placement, never as an
//! error. Nothing here checks that a signature is cryptographically valid.

use std::collections::HashSet;
use std::fmt;

use anyhow::Context;
use log::debug;
use lopdf::{Dictionary, Document, Object, ObjectId};
use openssl::pkcs7::Pkcs7;

use crate::identity::common_name;
use crate::text::decode_text_string;
use crate::{Error, ExactArrayOrNone, Rect};

/// A signature field found in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingSignature {
    /// Fully qualified field name, partial names joined with `.`.
    pub field_name: String,
    pub signer: SignerLabel,
    /// 0-based index of the page holding the widget.
    pub page_index: usize,
    /// Widget rectangle in page space. Zero for invisible signatures.
    pub rect: Rect,
    pub reason: Option<String>,
    /// The raw `/M` date string of the signature dictionary.
    pub signing_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerLabel {
    /// Common name of the first certificate embedded in the signature.
    Named(String),
    /// The signature value could not be decoded down to a common name.
    Unverified,
}

impl fmt::Display for SignerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerLabel::Named(name) => f.write_str(name),
            SignerLabel::Unverified => f.write_str("Unverified"),
        }
    }
}

/// Returns one entry per signature field, in the order the form lists them.
///
/// Fails only if the bytes can't be parsed as a PDF.
pub fn inspect_signatures(pdf_bytes: impl AsRef<[u8]>) -> Result<Vec<ExistingSignature>, Error> {
    let doc = Document::load_mem(pdf_bytes.as_ref())?;

    let mut inspector = Inspector {
        doc: &doc,
        pages: doc.get_pages().into_values().collect(),
        visited: HashSet::new(),
        found: Vec::new(),
    };

    let Some(fields) = inspector.root_fields() else {
        debug!("document has no interactive form");
        return Ok(Vec::new());
    };
    for field in fields {
        inspector.visit(field, None, None);
    }

    debug!("{} signature fields found", inspector.found.len());
    Ok(inspector.found)
}

struct Inspector<'a> {
    doc: &'a Document,
    /// Page object ids in page order.
    pages: Vec<ObjectId>,
    /// Guards against cycles through `/Kids`.
    visited: HashSet<ObjectId>,
    found: Vec<ExistingSignature>,
}

impl<'a> Inspector<'a> {
    fn root_fields(&self) -> Option<&'a Vec<Object>> {
        let doc = self.doc;
        doc.catalog()
            .and_then(|catalog| catalog.get_deref(b"AcroForm", doc))
            .and_then(Object::as_dict)
            .and_then(|form| form.get_deref(b"Fields", doc))
            .and_then(Object::as_array)
            .ok()
    }

    fn visit(&mut self, field: &'a Object, parent_name: Option<&str>, inherited_type: Option<&'a [u8]>) {
        let doc = self.doc;
        if let Object::Reference(id) = field {
            if !self.visited.insert(*id) {
                return;
            }
        }
        let Ok((field_id, Object::Dictionary(field))) = doc.dereference(field) else {
            return;
        };

        let partial_name = field.get(b"T").ok().and_then(decode_text_string);
        let full_name = match (parent_name, partial_name) {
            (Some(parent), Some(partial)) => format!("{parent}.{partial}"),
            (Some(parent), None) => parent.to_string(),
            (None, Some(partial)) => partial,
            (None, None) => String::new(),
        };
        let field_type = field
            .get(b"FT")
            .and_then(Object::as_name)
            .ok()
            .or(inherited_type);

        let kids = field
            .get_deref(b"Kids", doc)
            .and_then(Object::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        // Kids with a partial name are fields, the others are widgets.
        let child_fields: Vec<&'a Object> = kids
            .iter()
            .filter(|kid| {
                doc.dereference(kid)
                    .and_then(|(_, kid)| kid.as_dict())
                    .is_ok_and(|kid| kid.has(b"T"))
            })
            .collect();
        if !child_fields.is_empty() {
            for child in child_fields {
                self.visit(child, Some(&full_name), field_type);
            }
            return;
        }

        if field_type == Some(b"Sig".as_slice()) {
            let signature = self.describe(field_id, field, kids, full_name);
            self.found.push(signature);
        }
    }

    fn describe(
        &self,
        field_id: Option<ObjectId>,
        field: &'a Dictionary,
        kids: &'a [Object],
        field_name: String,
    ) -> ExistingSignature {
        let doc = self.doc;

        let merged =
            field.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Widget".as_slice());
        let widget = if merged {
            Some((field_id, field))
        } else {
            kids.iter().find_map(|kid| match doc.dereference(kid) {
                Ok((id, Object::Dictionary(widget))) => Some((id, widget)),
                _ => None,
            })
        };

        let (page_index, rect) = match widget {
            Some((widget_id, widget)) => (
                self.page_of(widget_id, widget).unwrap_or(0),
                widget_rect(doc, widget).unwrap_or_default(),
            ),
            None => (0, Rect::default()),
        };

        let signer = match signer_name(doc, field) {
            Ok(name) => SignerLabel::Named(name),
            Err(err) => {
                debug!("signer of field {:?} left unverified: {:#}", field_name, err);
                SignerLabel::Unverified
            }
        };

        let value = field.get_deref(b"V", doc).and_then(Object::as_dict).ok();

        ExistingSignature {
            signer,
            page_index,
            rect,
            reason: text_entry(value, b"Reason"),
            signing_time: text_entry(value, b"M"),
            field_name,
        }
    }

    /// Page of a widget: its `/P` entry, or the page whose `/Annots` lists
    /// it.
    fn page_of(&self, widget_id: Option<ObjectId>, widget: &Dictionary) -> Option<usize> {
        if let Ok(page_id) = widget.get(b"P").and_then(Object::as_reference) {
            if let Some(index) = self.pages.iter().position(|&p| p == page_id) {
                return Some(index);
            }
        }

        let widget_id = widget_id?;
        let doc = self.doc;
        self.pages.iter().position(|&page_id| {
            doc.get_dictionary(page_id)
                .and_then(|page| page.get_deref(b"Annots", doc))
                .and_then(Object::as_array)
                .is_ok_and(|annots| {
                    annots
                        .iter()
                        .any(|annot| annot.as_reference().is_ok_and(|id| id == widget_id))
                })
        })
    }
}

fn text_entry(dict: Option<&Dictionary>, key: &[u8]) -> Option<String> {
    dict.and_then(|dict| dict.get(key).ok())
        .and_then(decode_text_string)
}

fn widget_rect(doc: &Document, widget: &Dictionary) -> Option<Rect> {
    let corners = widget
        .get_deref(b"Rect", doc)
        .and_then(Object::as_array)
        .ok()?
        .iter()
        .map(|c| doc.dereference(c).and_then(|(_, c)| c.as_float()))
        .collect::<lopdf::Result<ExactArrayOrNone<f32, 4>>>()
        .ok()?
        .0?;
    Some(Rect::from_corners(corners))
}

/// Common name of the first certificate in the field's signature value.
fn signer_name(doc: &Document, field: &Dictionary) -> anyhow::Result<String> {
    let value = field.get_deref(b"V", doc)?.as_dict()?;
    let der = value.get_deref(b"Contents", doc)?.as_str()?;

    let pkcs7 = Pkcs7::from_der(der)?;
    let certificate = pkcs7
        .signed()
        .context("PKCS #7 content is not SignedData")?
        .certificates()
        .context("no certificates embedded")?
        .iter()
        .next()
        .context("empty certificate set")?;

    common_name(certificate.subject_name()).context("certificate subject has no common name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sign_pdf, test_support, SignOptions, VisualPlacement};

    use lopdf::{dictionary, StringFormat};

    #[test]
    fn document_without_form() {
        let pdf = test_support::sample_pdf(2);
        assert!(inspect_signatures(&pdf).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(inspect_signatures(b"%PDF-1.7 garbage").is_err());
    }

    #[test]
    fn reads_back_fresh_signatures() {
        test_support::init_logging();
        let identity = test_support::identity("Bob Builder");
        let pdf = test_support::sample_pdf(3);

        let invisible = sign_pdf(&pdf, &identity, None, SignOptions::default()).unwrap();
        let rect = Rect::new(40.0, 50.0, 100.0, 30.0);
        let options = SignOptions::default()
            .with_reason("Reviewed")
            .with_field_name("Review");
        let visible = sign_pdf(
            &invisible,
            &identity,
            Some(&VisualPlacement::new(2, rect)),
            options,
        )
        .unwrap();

        let found = inspect_signatures(&visible).unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(found[0].field_name, "Signature1");
        assert_eq!(found[0].signer, SignerLabel::Named("Bob Builder".to_string()));
        assert_eq!(found[0].page_index, 0);
        assert_eq!(found[0].rect, Rect::default());

        assert_eq!(found[1].field_name, "Review");
        assert_eq!(found[1].signer.to_string(), "Bob Builder");
        assert_eq!(found[1].page_index, 2);
        assert_eq!(found[1].rect, rect);
        assert_eq!(found[1].reason.as_deref(), Some("Reviewed"));
        assert!(found[1].signing_time.as_deref().unwrap().starts_with("D:"));

        // Pure read.
        assert_eq!(inspect_signatures(&visible).unwrap(), found);
    }

    /// Builds a form by hand: a parent field carrying `/FT /Sig` with two
    /// named kids, one of which has a garbage value and no `/P`, then a
    /// signature field with no widget at all.
    fn hand_made_form() -> Vec<u8> {
        let mut doc = Document::load_mem(&test_support::sample_pdf(2)).unwrap();
        let pages = doc.get_pages();
        let first = *pages.get(&1).unwrap();
        let second = *pages.get(&2).unwrap();

        let garbage_value = doc.add_object(dictionary! {
            "Type" => "Sig",
            "Contents" => Object::String(vec![0x30, 0x03, 0x02, 0x01], StringFormat::Hexadecimal),
        });
        let parent_id = doc.new_object_id();
        let broken = doc.add_object(dictionary! {
            "T" => Object::string_literal("broken"),
            "Parent" => parent_id,
            "Subtype" => "Widget",
            "V" => garbage_value,
            "Rect" => vec![200.into(), 300.into(), 100.into(), 250.into()],
        });
        let empty = doc.add_object(dictionary! {
            "T" => Object::string_literal("empty"),
            "Parent" => parent_id,
            "Subtype" => "Widget",
            "P" => first,
            "Rect" => vec![0.into(), 0.into(), 0.into(), 0.into()],
        });
        doc.objects.insert(
            parent_id,
            Object::Dictionary(dictionary! {
                "T" => Object::string_literal("approvals"),
                "FT" => "Sig",
                "Kids" => vec![broken.into(), empty.into(), parent_id.into()],
            }),
        );
        let text_field = doc.add_object(dictionary! {
            "T" => Object::string_literal("comment"),
            "FT" => "Tx",
            "Subtype" => "Widget",
            "P" => first,
        });

        doc.get_object_mut(second)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Annots", vec![broken.into()]);
        let unplaced = doc.add_object(dictionary! {
            "T" => Object::string_literal("unplaced"),
            "FT" => "Sig",
        });
        let form = dictionary! {
            "Fields" => vec![text_field.into(), parent_id.into(), unplaced.into()],
        };
        let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        doc.get_object_mut(catalog_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("AcroForm", form);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn nested_fields_degrade_gracefully() {
        test_support::init_logging();
        let found = inspect_signatures(hand_made_form()).unwrap();
        assert_eq!(found.len(), 3);

        let broken = &found[0];
        assert_eq!(broken.field_name, "approvals.broken");
        assert_eq!(broken.signer, SignerLabel::Unverified);
        assert_eq!(broken.signer.to_string(), "Unverified");
        // Found through the page /Annots, since /P is missing.
        assert_eq!(broken.page_index, 1);
        assert_eq!(broken.rect, Rect::new(100.0, 250.0, 100.0, 50.0));

        let empty = &found[1];
        assert_eq!(empty.field_name, "approvals.empty");
        assert_eq!(empty.signer, SignerLabel::Unverified);
        assert_eq!(empty.page_index, 0);
        assert_eq!(empty.reason, None);

        let unplaced = &found[2];
        assert_eq!(unplaced.field_name, "unplaced");
        assert_eq!(unplaced.signer, SignerLabel::Unverified);
        assert_eq!(unplaced.page_index, 0);
        assert_eq!(unplaced.rect, Rect::default());
        assert_eq!(unplaced.signing_time, None);
    }
}
