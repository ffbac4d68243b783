//! Image container detection from leading bytes, and extension correction.
//!
//! The extension of a downloaded file always comes from its content: remote
//! names are unreliable (`photo_jpg`, `image.jpeg` served as PNG, ...).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes needed to recognise every supported format.
const SNIFF_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    /// Canonical extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
        }
    }
}

/// Detect the image format from the first bytes of a file.
pub fn sniff_format(header: &[u8]) -> Option<ImageFormat> {
    // JPEG: SOI marker followed by the start of another marker.
    if header.len() >= 3 && header[0..3] == [0xFF, 0xD8, 0xFF] {
        return Some(ImageFormat::Jpeg);
    }

    // PNG: fixed 8-byte signature.
    if header.len() >= 8 && header[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some(ImageFormat::Png);
    }

    if header.len() >= 6 && (&header[0..6] == b"GIF87a" || &header[0..6] == b"GIF89a") {
        return Some(ImageFormat::Gif);
    }

    // WebP: RIFF container with "WEBP" form type at offset 8.
    if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }

    // BMP: "BM" plus a DIB header size we know (12, 40, 52, 56, 108 or 124) at offset 14.
    if header.len() >= 16 && &header[0..2] == b"BM" {
        let dib = u16::from_le_bytes([header[14], header[15]]);
        if matches!(dib, 12 | 40 | 52 | 56 | 108 | 124) {
            return Some(ImageFormat::Bmp);
        }
    }

    None
}

/// Reads the head of `path` and sniffs its format.
pub fn sniff_file(path: &Path) -> io::Result<Option<ImageFormat>> {
    let mut header = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(sniff_format(&header))
}

/// Suffixes treated as a stale extension, checked with `_` and `.` separators.
const EXTENSION_LIKE: [&str; 6] = ["jpeg", "jpg", "png", "gif", "webp", "bmp"];

fn ends_with_ignore_ascii_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.as_bytes()[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

/// Replaces any trailing extension-like suffix (`_jpg`, `.JPEG`, `_png`, ...)
/// with the canonical extension of `format`.
pub fn corrected_name(name: &str, format: ImageFormat) -> String {
    let mut stem = name;
    'outer: for ext in EXTENSION_LIKE {
        for sep in ['_', '.'] {
            let suffix = format!("{sep}{ext}");
            // The suffix is ASCII, so the cut is on a char boundary.
            if name.len() > suffix.len() && ends_with_ignore_ascii_case(name, &suffix) {
                stem = &name[..name.len() - suffix.len()];
                break 'outer;
            }
        }
    }
    format!("{}.{}", stem, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_HEAD: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn sniffs_known_signatures() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Some(ImageFormat::Jpeg));
        assert_eq!(sniff_format(&PNG_HEAD), Some(ImageFormat::Png));
        assert_eq!(sniff_format(b"GIF89a\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(sniff_format(b"RIFF\x24\x00\x00\x00WEBPVP8 "), Some(ImageFormat::Webp));
        let mut bmp = vec![b'B', b'M'];
        bmp.extend_from_slice(&[0; 12]);
        bmp.extend_from_slice(&40u32.to_le_bytes());
        assert_eq!(sniff_format(&bmp), Some(ImageFormat::Bmp));
    }

    #[test]
    fn rejects_non_images() {
        assert_eq!(sniff_format(b"<html><body>not found</body>"), None);
        assert_eq!(sniff_format(&[0xFF, 0xD8]), None);
        assert_eq!(sniff_format(b"BM not really a bitmap"), None);
        assert_eq!(sniff_format(&[]), None);
    }

    #[test]
    fn sniff_file_reads_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.part");
        let mut f = File::create(&path).unwrap();
        f.write_all(&PNG_HEAD).unwrap();
        f.write_all(&[0u8; 4096]).unwrap();
        drop(f);
        assert_eq!(sniff_file(&path).unwrap(), Some(ImageFormat::Png));
    }

    #[test]
    fn strips_underscore_suffixes() {
        assert_eq!(corrected_name("photo_png", ImageFormat::Png), "photo.png");
        assert_eq!(corrected_name("IMG_0042_JPG", ImageFormat::Jpeg), "IMG_0042.jpg");
        assert_eq!(corrected_name("holiday_jpeg", ImageFormat::Jpeg), "holiday.jpg");
    }

    #[test]
    fn replaces_misleading_extension() {
        assert_eq!(corrected_name("pic_jpg", ImageFormat::Png), "pic.png");
        assert_eq!(corrected_name("pic.jpeg", ImageFormat::Jpeg), "pic.jpg");
        assert_eq!(corrected_name("anim.PNG", ImageFormat::Gif), "anim.gif");
    }

    #[test]
    fn appends_when_no_suffix() {
        assert_eq!(corrected_name("plain", ImageFormat::Webp), "plain.webp");
        assert_eq!(corrected_name("archive.tar", ImageFormat::Png), "archive.tar.png");
        // A bare suffix is the whole name, not a stale extension.
        assert_eq!(corrected_name("_png", ImageFormat::Png), "_png.png");
    }
}
