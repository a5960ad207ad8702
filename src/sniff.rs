// src/sniff.rs
//! Content type detection from magic bytes
//!
//! The uploaded object's Content-Type comes from what the converted file
//! actually is, not from the mimetype the repository declared for the
//! source. Only the leading bytes are inspected.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Fallback when nothing matches
pub const OCTET_STREAM: &str = "application/octet-stream";

/// JP2 signature box: length 12, type "jP  ", content 0d0a870a
const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20, 0x0d, 0x0a, 0x87, 0x0a,
];

/// Number of bytes needed to recognize every supported format
const SNIFF_LEN: usize = 32;

/// Detect a mimetype from the first bytes of a file's content
///
/// Magic bytes:
/// - JPEG 2000 family: JP2 signature box, then the `ftyp` brand at offset 20
/// - J2K codestream: `ff 4f ff 51`
/// - TIFF: `49 49 2a 00` or `4d 4d 00 2a`
/// - PNG: `89 50 4e 47`, JPEG: `ff d8 ff`, GIF: `GIF8`, BMP: `BM`
/// - PNM: `P1`..`P6`, PDF: `%PDF`
pub fn from_magic_bytes(data: &[u8]) -> &'static str {
    if data.starts_with(&JP2_SIGNATURE) {
        return match data.get(20..24) {
            Some(b"jpx ") => "image/jpx",
            Some(b"jpm ") => "image/jpm",
            _ => "image/jp2",
        };
    }
    if data.starts_with(&[0xff, 0x4f, 0xff, 0x51]) {
        return "image/j2k";
    }
    if data.starts_with(&[0x49, 0x49, 0x2a, 0x00]) || data.starts_with(&[0x4d, 0x4d, 0x00, 0x2a]) {
        return "image/tiff";
    }
    if data.starts_with(&[0x89, 0x50, 0x4e, 0x47]) {
        return "image/png";
    }
    if data.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if data.starts_with(b"GIF8") {
        return "image/gif";
    }
    if data.starts_with(b"%PDF") {
        return "application/pdf";
    }
    if data.starts_with(b"BM") && data.len() >= 14 {
        return "image/bmp";
    }
    if data.len() >= 3 && data[0] == b'P' && data[2].is_ascii_whitespace() {
        return match data[1] {
            b'1' | b'4' => "image/x-portable-bitmap",
            b'2' | b'5' => "image/x-portable-graymap",
            b'3' | b'6' => "image/x-portable-pixmap",
            _ => OCTET_STREAM,
        };
    }
    OCTET_STREAM
}

/// Detect a file's mimetype by reading its leading bytes
pub fn from_file(path: &Path) -> io::Result<&'static str> {
    let mut file = File::open(path)?;
    let mut header = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut header)?;
    Ok(from_magic_bytes(&header))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jp2_header(brand: &[u8; 4]) -> Vec<u8> {
        let mut data = JP2_SIGNATURE.to_vec();
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x14]);
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(brand);
        data
    }

    #[test]
    fn test_jpeg2000_family() {
        assert_eq!(from_magic_bytes(&jp2_header(b"jp2 ")), "image/jp2");
        assert_eq!(from_magic_bytes(&jp2_header(b"jpx ")), "image/jpx");
        assert_eq!(from_magic_bytes(&jp2_header(b"jpm ")), "image/jpm");
        assert_eq!(from_magic_bytes(&[0xff, 0x4f, 0xff, 0x51, 0x00]), "image/j2k");
    }

    #[test]
    fn test_common_rasters() {
        assert_eq!(from_magic_bytes(&[0x49, 0x49, 0x2a, 0x00, 0x08]), "image/tiff");
        assert_eq!(from_magic_bytes(&[0x4d, 0x4d, 0x00, 0x2a, 0x00]), "image/tiff");
        assert_eq!(from_magic_bytes(&[0x89, 0x50, 0x4e, 0x47, 0x0d]), "image/png");
        assert_eq!(from_magic_bytes(&[0xff, 0xd8, 0xff, 0xe0]), "image/jpeg");
        assert_eq!(from_magic_bytes(b"GIF89a"), "image/gif");
        assert_eq!(from_magic_bytes(b"P6\n640 480\n255\n"), "image/x-portable-pixmap");
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(from_magic_bytes(b""), OCTET_STREAM);
        assert_eq!(from_magic_bytes(b"hello world"), OCTET_STREAM);
        assert_eq!(from_magic_bytes(b"%PDF-1.7"), "application/pdf");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jp2");
        std::fs::write(&path, jp2_header(b"jp2 ")).unwrap();
        assert_eq!(from_file(&path).unwrap(), "image/jp2");
    }
}
