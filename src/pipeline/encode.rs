//! Image encoding: `DynamicImage` → base64 PNG for the model server.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page bitmap as a base64 PNG string.
pub fn encode_page(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let data = encode_page(&img).expect("encode should succeed");
        let decoded = STANDARD.decode(&data).expect("valid base64");
        let back = image::load_from_memory_with_format(&decoded, image::ImageFormat::Png)
            .expect("valid png");
        assert_eq!((back.width(), back.height()), (10, 10));
    }
}
