//! File type classification from the uploaded bytes.
//!
//! The client-declared content type and filename are untrusted: a browser
//! labels whatever the OS guesses, and scripts often send
//! `application/octet-stream`. The decision is made from the file
//! signature alone; declared metadata is only logged when it disagrees.

use image::ImageFormat;
use tracing::{debug, warn};

/// PDF magic bytes.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Readers tolerate junk before the header within the first KiB.
const PDF_HEADER_WINDOW: usize = 1024;

/// What an upload turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image(ImageFormat),
    Pdf,
    Unsupported,
}

impl FileKind {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Image(ImageFormat::Png) => "png",
            FileKind::Image(ImageFormat::Jpeg) => "jpeg",
            FileKind::Image(_) => "image",
            FileKind::Pdf => "pdf",
            FileKind::Unsupported => "unsupported",
        }
    }
}

/// Classify an upload by signature.
pub fn classify(
    bytes: &[u8],
    declared_content_type: Option<&str>,
    filename: Option<&str>,
) -> FileKind {
    let kind = sniff(bytes);

    if let Some(declared) = declared_kind(declared_content_type, filename) {
        if declared != kind {
            warn!(
                "Declared type {:?} (filename {:?}) disagrees with signature; treating upload as {}",
                declared_content_type,
                filename,
                kind.label()
            );
        }
    }

    debug!("Classified {} byte upload as {}", bytes.len(), kind.label());
    kind
}

fn sniff(bytes: &[u8]) -> FileKind {
    if bytes.is_empty() {
        return FileKind::Unsupported;
    }

    // Image signatures sit at offset 0; a `%PDF-` string inside image
    // metadata must not win over them.
    if let Ok(fmt @ (ImageFormat::Png | ImageFormat::Jpeg)) = image::guess_format(bytes) {
        return FileKind::Image(fmt);
    }

    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if window
        .windows(PDF_MAGIC.len())
        .any(|w| w == PDF_MAGIC)
    {
        return FileKind::Pdf;
    }

    FileKind::Unsupported
}

/// What the client claims the file is, from content type then extension.
fn declared_kind(content_type: Option<&str>, filename: Option<&str>) -> Option<FileKind> {
    let from_type = content_type.and_then(|ct| {
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(FileKind::Pdf),
            "image/png" => Some(FileKind::Image(ImageFormat::Png)),
            "image/jpeg" | "image/jpg" => Some(FileKind::Image(ImageFormat::Jpeg)),
            "application/octet-stream" | "" => None,
            _ => Some(FileKind::Unsupported),
        }
    });

    from_type.or_else(|| {
        let ext = filename?.rsplit_once('.')?.1.to_ascii_lowercase();
        Some(match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "png" => FileKind::Image(ImageFormat::Png),
            "jpg" | "jpeg" => FileKind::Image(ImageFormat::Jpeg),
            _ => FileKind::Unsupported,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_SIG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn detects_by_signature() {
        assert_eq!(classify(PNG_SIG, None, None), FileKind::Image(ImageFormat::Png));
        assert_eq!(classify(JPEG_SIG, None, None), FileKind::Image(ImageFormat::Jpeg));
        assert_eq!(classify(b"%PDF-1.7\n%\xe2\xe3", None, None), FileKind::Pdf);
    }

    fn crc32(bytes: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &b in bytes {
            crc ^= b as u32;
            for _ in 0..8 {
                crc = if crc & 1 == 1 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
            }
        }
        !crc
    }

    /// A real PNG with a `tEXt` chunk inserted right after IHDR.
    fn png_with_text_chunk(text: &[u8]) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(20, 20));
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let mut chunk = Vec::new();
        chunk.extend_from_slice(&(text.len() as u32).to_be_bytes());
        let body_start = chunk.len();
        chunk.extend_from_slice(b"tEXt");
        chunk.extend_from_slice(text);
        let crc = crc32(&chunk[body_start..]);
        chunk.extend_from_slice(&crc.to_be_bytes());

        // Signature (8) + IHDR chunk (4 + 4 + 13 + 4).
        let at = 8 + 25;
        let tail = png.split_off(at);
        png.extend_from_slice(&chunk);
        png.extend_from_slice(&tail);
        png
    }

    #[test]
    fn pdf_marker_in_image_metadata_stays_an_image() {
        let png = png_with_text_chunk(b"Comment\0converted from %PDF-1.4 source");
        assert!(image::load_from_memory_with_format(&png, ImageFormat::Png).is_ok());
        assert_eq!(
            classify(&png, Some("image/png"), Some("scan.png")),
            FileKind::Image(ImageFormat::Png)
        );

        let mut jpeg = JPEG_SIG.to_vec();
        jpeg.extend_from_slice(b"\xFF\xFE\x00\x18exported from %PDF-1.7");
        assert_eq!(classify(&jpeg, None, None), FileKind::Image(ImageFormat::Jpeg));
    }

    #[test]
    fn pdf_header_after_leading_junk() {
        let mut bytes = vec![b' '; 100];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert_eq!(classify(&bytes, None, None), FileKind::Pdf);
    }

    #[test]
    fn declared_type_does_not_override_signature() {
        // A text file labelled as a PDF stays unsupported.
        assert_eq!(
            classify(b"hello world", Some("application/pdf"), Some("x.pdf")),
            FileKind::Unsupported
        );
        // A real PNG labelled as text is still an image.
        assert_eq!(
            classify(PNG_SIG, Some("text/plain"), Some("notes.txt")),
            FileKind::Image(ImageFormat::Png)
        );
    }

    #[test]
    fn empty_and_other_images_are_unsupported() {
        assert_eq!(classify(b"", None, None), FileKind::Unsupported);
        assert_eq!(classify(b"GIF89a\x01\x00", None, None), FileKind::Unsupported);
    }

    #[test]
    fn declared_kind_reads_content_type_parameters() {
        assert_eq!(
            declared_kind(Some("application/pdf; charset=binary"), None),
            Some(FileKind::Pdf)
        );
        assert_eq!(
            declared_kind(Some("application/octet-stream"), Some("scan.JPG")),
            Some(FileKind::Image(ImageFormat::Jpeg))
        );
        assert_eq!(declared_kind(None, Some("README")), None);
    }
}
