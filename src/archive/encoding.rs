//! Text encoding detection for archive entries.
//!
//! Labeling files are normally UTF-8, but some submissions arrive as
//! UTF-16 (LE or BE, with a BOM) or UTF-8 with a BOM. quick-xml only reads
//! UTF-8, so entries are detected by BOM and converted with encoding_rs.

use crate::error::ArchiveError;

const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Encoding of an entry as indicated by its BOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le,
    Utf16Be,
    Utf8Bom,
    Utf8,
}

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Utf8Bom | TextEncoding::Utf8 => "UTF-8",
        }
    }
}

pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(&UTF16_LE_BOM) {
        TextEncoding::Utf16Le
    } else if bytes.starts_with(&UTF16_BE_BOM) {
        TextEncoding::Utf16Be
    } else if bytes.starts_with(&UTF8_BOM) {
        TextEncoding::Utf8Bom
    } else {
        TextEncoding::Utf8
    }
}

/// Decode entry bytes to a UTF-8 string. The BOM is never part of the result.
pub fn decode_text(entry: &str, bytes: &[u8]) -> Result<String, ArchiveError> {
    let encoding = detect_encoding(bytes);
    let decode_error = || ArchiveError::Decode {
        entry: entry.to_string(),
        encoding: encoding.label(),
    };

    match encoding {
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            let codec = if encoding == TextEncoding::Utf16Le {
                encoding_rs::UTF_16LE
            } else {
                encoding_rs::UTF_16BE
            };
            let (text, had_errors) = codec.decode_without_bom_handling(&bytes[2..]);
            if had_errors {
                return Err(decode_error());
            }
            Ok(text.into_owned())
        }
        TextEncoding::Utf8Bom => String::from_utf8(bytes[3..].to_vec()).map_err(|_| decode_error()),
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| decode_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(text: &str, big_endian: bool) -> Vec<u8> {
        let mut bytes = if big_endian { UTF16_BE_BOM.to_vec() } else { UTF16_LE_BOM.to_vec() };
        for unit in text.encode_utf16() {
            let pair = if big_endian { unit.to_be_bytes() } else { unit.to_le_bytes() };
            bytes.extend_from_slice(&pair);
        }
        bytes
    }

    #[test]
    fn test_detect_encoding() {
        assert_eq!(detect_encoding(&[0xFF, 0xFE, 0x3C, 0x00]), TextEncoding::Utf16Le);
        assert_eq!(detect_encoding(&[0xFE, 0xFF, 0x00, 0x3C]), TextEncoding::Utf16Be);
        assert_eq!(detect_encoding(&[0xEF, 0xBB, 0xBF, 0x3C]), TextEncoding::Utf8Bom);
        assert_eq!(detect_encoding(b"<?xm"), TextEncoding::Utf8);
        assert_eq!(detect_encoding(&[]), TextEncoding::Utf8);
    }

    #[test]
    fn test_decode_utf16() {
        assert_eq!(decode_text("a.xml", &utf16("<document/>", false)).unwrap(), "<document/>");
        assert_eq!(decode_text("a.xml", &utf16("<document/>", true)).unwrap(), "<document/>");
    }

    #[test]
    fn test_decode_utf8_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("<title>Ibuprofène</title>".as_bytes());
        assert_eq!(decode_text("a.xml", &bytes).unwrap(), "<title>Ibuprofène</title>");
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let err = decode_text("bad.xml", &[b'<', 0xC3, 0x28, b'>']).unwrap_err();
        assert!(matches!(err, ArchiveError::Decode { encoding: "UTF-8", .. }));
    }

    #[test]
    fn test_unpaired_surrogate_is_decode_error() {
        let bytes = [0xFF, 0xFE, 0x00, 0xD8, 0x3C, 0x00];
        let err = decode_text("bad.xml", &bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::Decode { encoding: "UTF-16LE", .. }));
    }
}
