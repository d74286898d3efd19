//! Draws the signature stamp image onto a page.

use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::{Error, Rect};

/// Embeds `image_bytes` (PNG or JPEG) as an image XObject and paints it over
/// `rect` on the page. Transparency is kept through a soft mask.
pub(crate) fn draw_image(
    doc: &mut Document,
    page_id: ObjectId,
    image_bytes: &[u8],
    rect: &Rect,
) -> Result<ObjectId, Error> {
    let image = image::load_from_memory(image_bytes)?.to_rgba8();
    let (width, height) = image.dimensions();

    let pixel_count = width as usize * height as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);
    for pixel in image.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut smask = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        alpha,
    );
    smask.compress()?;
    let smask_id = doc.add_object(smask);

    let mut xobject = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "SMask" => smask_id,
        },
        rgb,
    );
    xobject.compress()?;
    let image_id = doc.add_object(xobject);

    let name = format!("SigStamp{}", image_id.0);
    doc.add_xobject(page_id, name.clone(), image_id)?;

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(rect.width),
                    0.into(),
                    0.into(),
                    Object::Real(rect.height),
                    Object::Real(rect.x),
                    Object::Real(rect.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ],
    };
    doc.add_page_contents(page_id, content.encode()?)?;

    debug!(
        "stamp of {}x{} pixels drawn on page object {:?}",
        width, height, page_id
    );

    Ok(image_id)
}
