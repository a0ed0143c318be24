//! Image encoding: `DynamicImage` → PNG bytes, PNG bytes → base64 `ImageData`.
//!
//! PNG is lossless, which keeps slide text crisp both in the stored page
//! images and in the optional image attached to a narration request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes as a base64 image attachment for the narration model.
///
/// `detail: "low"` is enough here: the slide text already travels in the
/// prompt, the image only adds layout and figures.
pub fn png_to_image_data(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded slide image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("low")
}
