//! Fixtures shared by the unit tests: throwaway identities and documents.

use std::io::Cursor;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Name, X509};

use crate::SigningIdentity;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509Name::builder().unwrap();
    builder
        .append_entry_by_nid(Nid::ORGANIZATIONNAME, "Test Org")
        .unwrap();
    builder
        .append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    builder.build()
}

/// Issues a certificate for `key`, self-signed when `issuer` is `None`.
fn issue(
    common_name: &str,
    serial: u32,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    ca: bool,
) -> X509 {
    let subject = name(common_name);
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&subject).unwrap();
    match issuer {
        Some((cert, _)) => builder.set_issuer_name(cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&subject).unwrap(),
    }
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
    }
    let signing_key = issuer.map_or(key, |(_, issuer_key)| issuer_key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// Self-signed RSA-2048 identity.
pub fn identity(common_name: &str) -> SigningIdentity {
    let key = rsa_key();
    let certificate = issue(common_name, 1, &key, None, false);
    SigningIdentity::new(key, certificate, Vec::new()).unwrap()
}

/// Leaf issued by an intermediate, itself issued by a root. Returns the
/// chain (intermediate only), the leaf key and the leaf certificate.
pub fn chained_identity_parts(common_name: &str) -> (Vec<X509>, PKey<Private>, X509) {
    let root_key = rsa_key();
    let root = issue("Test Root CA", 10, &root_key, None, true);
    let intermediate_key = rsa_key();
    let intermediate = issue(
        "Test Intermediate CA",
        11,
        &intermediate_key,
        Some((&root, &root_key)),
        true,
    );
    let leaf_key = rsa_key();
    let leaf = issue(
        common_name,
        0x8001,
        &leaf_key,
        Some((&intermediate, &intermediate_key)),
        false,
    );
    (vec![intermediate], leaf_key, leaf)
}

pub fn chained_identity(common_name: &str) -> SigningIdentity {
    let (chain, key, leaf) = chained_identity_parts(common_name);
    SigningIdentity::new(key, leaf, chain).unwrap()
}

/// A plain document with `page_count` A4 pages of text.
pub fn sample_pdf(page_count: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in 0..page_count {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Page {}", page + 1))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Small semi-transparent PNG.
pub fn png_stamp() -> Vec<u8> {
    let image = image::RgbaImage::from_fn(8, 4, |x, _| {
        if x % 2 == 0 {
            image::Rgba([20, 40, 160, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    bytes
}
