//! Signing pipeline.
//!
//! A call goes through a fixed sequence of stages: the signature dictionary
//! is injected with placeholder values, the document is serialized, the
//! placeholder is located and its byte range patched, the covered spans are
//! digested and signed, and the DER is written over the placeholder. Nothing
//! is returned unless every stage succeeds.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};

use crate::byte_range::{self, PlaceholderLocator, TextualLocator, BYTE_RANGE_SENTINEL};
use crate::text::{decode_text_string, text_string};
use crate::{cms, stamp, verify, DetachedSigner, Error, Rect, SignOptions, VisualPlacement};

/// Widget annotation flags: Print and Locked.
const WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist and AppendOnly.
const SIG_FLAGS: i64 = 3;

const FIELD_NAME_PREFIX: &str = "Signature";

/// Signs documents with a [`DetachedSigner`].
///
/// The signer holds no per-call state, so one instance can sign any number
/// of documents, from several threads if the backend allows it.
#[derive(Debug)]
pub struct Signer<S, L = TextualLocator> {
    backend: S,
    options: SignOptions,
    locator: L,
}

impl<S: DetachedSigner> Signer<S> {
    pub fn new(backend: S, options: SignOptions) -> Self {
        Self {
            backend,
            options,
            locator: TextualLocator,
        }
    }
}

impl<S: DetachedSigner, L: PlaceholderLocator> Signer<S, L> {
    /// Replaces the textual placeholder scan.
    pub fn with_locator<M: PlaceholderLocator>(self, locator: M) -> Signer<S, M> {
        Signer {
            backend: self.backend,
            options: self.options,
            locator,
        }
    }

    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Adds a signature to `pdf` and returns the signed document.
    ///
    /// Without a `placement` the signature is invisible: its widget has a
    /// zero rectangle on the first page.
    pub fn sign(&self, pdf: &[u8], placement: Option<&VisualPlacement>) -> Result<Vec<u8>, Error> {
        let signing_time = Utc::now();
        let contents_width = self.options.contents_width()?;

        let mut doc = Document::load_mem(pdf)?;
        if doc.trailer.has(b"Encrypt") {
            return Err(Error::structural("encrypted documents cannot be signed"));
        }
        let catalog_id = doc.trailer.get(b"Root")?.as_reference()?;
        if self.options.lock {
            ensure_lockable(&doc, catalog_id)?;
        }

        let (page_index, rect) = match placement {
            Some(placement) => (placement.page_index, placement.rect),
            None => (0, Rect::default()),
        };
        let page_id = doc
            .get_pages()
            .values()
            .nth(page_index)
            .copied()
            .ok_or_else(|| {
                Error::structural(format!("document has no page with index {page_index}"))
            })?;

        let field_name = self.field_name(&doc, catalog_id)?;

        let signature_id = doc.add_object(self.signature_dictionary(signing_time));
        if self.options.lock {
            lock_document(&mut doc, catalog_id, signature_id)?;
        }

        let widget_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Sig",
            "T" => text_string(&field_name),
            "V" => signature_id,
            "F" => WIDGET_FLAGS,
            "P" => page_id,
            "Rect" => rect.to_corners().iter().map(|&c| Object::Real(c)).collect::<Vec<_>>(),
        });
        append_annotation(&mut doc, page_id, widget_id)?;
        register_field(&mut doc, catalog_id, widget_id)?;

        if let Some(image) = placement.and_then(|p| p.image.as_deref()) {
            stamp::draw_image(&mut doc, page_id, image, &rect)?;
        }
        debug!(
            "placeholder injected: field {:?}, signature object {:?}, page {}",
            field_name, signature_id, page_index
        );

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        let serialized_len = bytes.len();
        debug!("document serialized to {} bytes", serialized_len);

        let placeholder = self.locator.locate(&bytes, contents_width)?;
        placeholder.check_bounds(&bytes)?;
        let byte_range = byte_range::patch_byte_range(&mut bytes, &placeholder)?;
        debug!("byte range computed: {:?}", byte_range);

        let digest = cms::digest_spans(placeholder.signed_spans(&bytes));
        debug!("signed spans digested: {}", hex::encode(digest));

        let der = self.backend.sign_digest(&digest, signing_time)?;
        let contents = cms::encode_contents(&der, placeholder.interior_width())?;
        debug!(
            "signature container of {} DER bytes ({} reserved)",
            der.len(),
            self.options.signature_capacity
        );

        byte_range::patch_contents(&mut bytes, &placeholder, &contents)?;
        debug_assert_eq!(bytes.len(), serialized_len);

        if self.options.verify_output {
            verify::check_signed_output(&bytes, signature_id, byte_range)?;
            debug!("signed output passed the byte range self-check");
        }

        info!(
            "signed document as field {:?} ({} bytes, locked: {})",
            field_name,
            bytes.len(),
            self.options.lock
        );

        Ok(bytes)
    }

    fn signature_dictionary(&self, signing_time: DateTime<Utc>) -> Dictionary {
        let sentinel = Object::Integer(BYTE_RANGE_SENTINEL);
        let mut signature = dictionary! {
            "Type" => "Sig",
            "Filter" => "Adobe.PPKLite",
            "SubFilter" => "adbe.pkcs7.detached",
            "Contents" => Object::String(
                vec![0; self.options.signature_capacity],
                StringFormat::Hexadecimal,
            ),
            "ByteRange" => vec![0.into(), sentinel.clone(), sentinel.clone(), sentinel],
            "Reason" => text_string(&self.options.reason),
            "M" => Object::string_literal(pdf_date(signing_time)),
        };

        let name = self
            .options
            .name
            .clone()
            .or_else(|| self.backend.signer_name());
        if let Some(name) = name {
            signature.set("Name", text_string(&name));
        }
        if let Some(location) = &self.options.location {
            signature.set("Location", text_string(location));
        }
        if let Some(contact_info) = &self.options.contact_info {
            signature.set("ContactInfo", text_string(contact_info));
        }

        signature
    }

    fn field_name(&self, doc: &Document, catalog_id: ObjectId) -> Result<String, Error> {
        let fields = top_level_fields(doc, catalog_id);
        if fields
            .iter()
            .any(|field| field.get(b"FT").and_then(Object::as_name).ok() == Some(b"Sig".as_slice()))
        {
            warn!("document already holds signatures, rewriting it breaks their byte ranges");
        }

        let taken: Vec<String> = fields
            .iter()
            .filter_map(|field| field.get(b"T").ok())
            .filter_map(decode_text_string)
            .collect();
        match &self.options.field_name {
            Some(name) if taken.contains(name) => Err(Error::structural(format!(
                "a form field named {name:?} already exists"
            ))),
            Some(name) => Ok(name.clone()),
            None => Ok((1..)
                .map(|n| format!("{FIELD_NAME_PREFIX}{n}"))
                .find(|candidate| !taken.contains(candidate))
                .unwrap_or_default()),
        }
    }
}

/// Signs `pdf` in one call. See [`Signer::sign`].
pub fn sign_pdf<S: DetachedSigner>(
    pdf: &[u8],
    signer: S,
    placement: Option<&VisualPlacement>,
    options: SignOptions,
) -> Result<Vec<u8>, Error> {
    Signer::new(signer, options).sign(pdf, placement)
}

/// `D:YYYYMMDDHHmmSS+00'00'`
fn pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

fn top_level_fields(doc: &Document, catalog_id: ObjectId) -> Vec<&Dictionary> {
    let fields = doc
        .get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get_deref(b"AcroForm", doc))
        .and_then(Object::as_dict)
        .and_then(|form| form.get_deref(b"Fields", doc))
        .and_then(Object::as_array);
    let Ok(fields) = fields else {
        return Vec::new();
    };

    fields
        .iter()
        .filter_map(|field| doc.dereference(field).ok())
        .filter_map(|(_, field)| field.as_dict().ok())
        .collect()
}

fn ensure_lockable(doc: &Document, catalog_id: ObjectId) -> Result<(), Error> {
    let certified = doc
        .get_dictionary(catalog_id)?
        .get_deref(b"Perms", doc)
        .and_then(Object::as_dict)
        .map(|perms| perms.has(b"DocMDP"))
        .unwrap_or(false);
    if certified {
        return Err(Error::structural(
            "document is already certified with /Perms /DocMDP",
        ));
    }
    Ok(())
}

/// Certifies the document: the signature references a DocMDP transform
/// forbidding any change, and the catalog points `/Perms /DocMDP` at it.
fn lock_document(doc: &mut Document, catalog_id: ObjectId, signature_id: ObjectId) -> Result<(), Error> {
    let params_id = doc.add_object(dictionary! {
        "Type" => "TransformParams",
        "P" => 1,
        "V" => "1.2",
    });
    let reference = dictionary! {
        "Type" => "SigRef",
        "TransformMethod" => "DocMDP",
        "DigestMethod" => "SHA256",
        "TransformParams" => params_id,
    };
    doc.get_object_mut(signature_id)?
        .as_dict_mut()?
        .set("Reference", vec![Object::Dictionary(reference)]);

    let catalog = doc.get_object_mut(catalog_id)?.as_dict_mut()?;
    match catalog.get(b"Perms").ok().cloned() {
        Some(Object::Reference(perms_id)) => {
            doc.get_object_mut(perms_id)?
                .as_dict_mut()?
                .set("DocMDP", signature_id);
        }
        Some(Object::Dictionary(mut perms)) => {
            perms.set("DocMDP", signature_id);
            catalog.set("Perms", perms);
        }
        Some(_) => return Err(Error::structural("catalog /Perms is not a dictionary")),
        None => catalog.set("Perms", dictionary! { "DocMDP" => signature_id }),
    }

    debug!("document certified by signature {:?}", signature_id);
    Ok(())
}

/// Appends the widget to the page `/Annots`, inline or indirect.
fn append_annotation(doc: &mut Document, page_id: ObjectId, widget_id: ObjectId) -> Result<(), Error> {
    let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
    match page.get(b"Annots").ok().cloned() {
        Some(Object::Reference(annots_id)) => {
            doc.get_object_mut(annots_id)?
                .as_array_mut()?
                .push(widget_id.into());
        }
        Some(Object::Array(mut annots)) => {
            annots.push(widget_id.into());
            page.set("Annots", annots);
        }
        Some(_) => return Err(Error::structural("page /Annots is not an array")),
        None => page.set("Annots", vec![widget_id.into()]),
    }
    Ok(())
}

/// Adds the field to the AcroForm, creating the form if needed, and sets
/// `/SigFlags`.
fn register_field(doc: &mut Document, catalog_id: ObjectId, field_id: ObjectId) -> Result<(), Error> {
    let catalog = doc.get_object_mut(catalog_id)?.as_dict_mut()?;
    let form_id = match catalog.get(b"AcroForm").ok().cloned() {
        Some(Object::Reference(form_id)) => Some(form_id),
        Some(Object::Dictionary(_)) => None,
        Some(_) => return Err(Error::structural("catalog /AcroForm is not a dictionary")),
        None => {
            catalog.set("AcroForm", Dictionary::new());
            None
        }
    };

    let form = match form_id {
        Some(form_id) => doc.get_object_mut(form_id)?.as_dict_mut()?,
        None => doc
            .get_object_mut(catalog_id)?
            .as_dict_mut()?
            .get_mut(b"AcroForm")?
            .as_dict_mut()?,
    };
    form.set("SigFlags", SIG_FLAGS);

    match form.get(b"Fields").ok().cloned() {
        Some(Object::Reference(fields_id)) => {
            doc.get_object_mut(fields_id)?
                .as_array_mut()?
                .push(field_id.into());
        }
        Some(Object::Array(mut fields)) => {
            fields.push(field_id.into());
            form.set("Fields", fields);
        }
        Some(_) => return Err(Error::structural("AcroForm /Fields is not an array")),
        None => form.set("Fields", vec![field_id.into()]),
    }
    Ok(())
}
