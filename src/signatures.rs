use crate::types::FileKind;

/// JPEG start-of-image marker
pub const JPEG_SOI: &[u8] = b"\xff\xd8";
/// SOI followed by an APP0 (JFIF) segment
pub const JPEG_HEADER_JFIF: &[u8] = b"\xff\xd8\xff\xe0";
/// SOI followed by an APP1 (Exif) segment
pub const JPEG_HEADER_EXIF: &[u8] = b"\xff\xd8\xff\xe1";
/// JPEG end-of-image marker
pub const JPEG_EOI: &[u8] = b"\xff\xd9";

pub const PDF_MAGIC: &[u8] = b"%PDF";
pub const PDF_EOF: &[u8] = b"%%EOF";

/// Prefix that marks a block as the start of a file of `kind`
pub fn header_prefix(kind: FileKind) -> Option<&'static [u8]> {
    match kind {
        FileKind::Jpeg => Some(JPEG_SOI),
        FileKind::Pdf => Some(PDF_MAGIC),
        FileKind::Other => None,
    }
}

/// Marker whose presence closes a file of `kind`
pub fn footer_marker(kind: FileKind) -> Option<&'static [u8]> {
    match kind {
        FileKind::Jpeg => Some(JPEG_EOI),
        FileKind::Pdf => Some(PDF_EOF),
        FileKind::Other => None,
    }
}

/// Header variants and footer used by the windowed carver
#[derive(Debug, Clone)]
pub struct CarveSignature {
    pub kind: FileKind,
    pub headers: Vec<&'static [u8]>,
    pub footer: &'static [u8],
}

impl CarveSignature {
    pub fn jpeg() -> Self {
        Self {
            kind: FileKind::Jpeg,
            headers: vec![JPEG_HEADER_JFIF, JPEG_HEADER_EXIF],
            footer: JPEG_EOI,
        }
    }

    pub fn pdf() -> Self {
        Self {
            kind: FileKind::Pdf,
            headers: vec![PDF_MAGIC],
            footer: PDF_EOF,
        }
    }

    pub fn for_kind(kind: FileKind) -> Option<Self> {
        match kind {
            FileKind::Jpeg => Some(Self::jpeg()),
            FileKind::Pdf => Some(Self::pdf()),
            FileKind::Other => None,
        }
    }
}
