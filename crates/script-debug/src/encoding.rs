//! Text encodings used for console output and chunk names.
//! - TextEncoding: utf8 or the legacy ansi code page (windows-1252)
//! - decode/encode: conversions to and from protocol strings

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Encoding of bytes produced by the debugged process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8, invalid sequences replaced with U+FFFD.
    #[default]
    #[serde(alias = "utf-8", alias = "none")]
    Utf8,
    /// Windows-1252 single-byte code page.
    #[serde(alias = "cp1252", alias = "windows-1252")]
    Ansi,
}

// 0x80..=0x9F; zero marks bytes without a mapping, which pass through as C1 controls.
const CP1252_HIGH: [u16; 32] = [
    0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
    0x0152, 0, 0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, 0x02DC,
    0x2122, 0x0161, 0x203A, 0x0153, 0, 0x017E, 0x0178,
];

impl TextEncoding {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Ansi => "ansi",
        }
    }

    /// Decode raw bytes into a protocol string.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Cow<'_, str> {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes),
            Self::Ansi => {
                if bytes.is_ascii() {
                    // ASCII bytes are valid UTF-8 as-is.
                    return String::from_utf8_lossy(bytes);
                }
                Cow::Owned(bytes.iter().map(|&byte| cp1252_char(byte)).collect())
            }
        }
    }

    /// Encode a protocol string into bytes for the debugged process.
    ///
    /// Characters without a representation become `?`.
    #[must_use]
    pub fn encode(self, text: &str) -> Cow<'_, [u8]> {
        match self {
            Self::Utf8 => Cow::Borrowed(text.as_bytes()),
            Self::Ansi => {
                if text.is_ascii() {
                    return Cow::Borrowed(text.as_bytes());
                }
                Cow::Owned(text.chars().map(cp1252_byte).collect())
            }
        }
    }
}

fn cp1252_char(byte: u8) -> char {
    if (0x80..0xA0).contains(&byte) {
        let mapped = CP1252_HIGH[usize::from(byte - 0x80)];
        if mapped != 0 {
            return char::from_u32(u32::from(mapped)).unwrap_or(char::REPLACEMENT_CHARACTER);
        }
    }
    char::from(byte)
}

fn cp1252_byte(ch: char) -> u8 {
    let code = u32::from(ch);
    if code < 0x80 || (0xA0..=0xFF).contains(&code) {
        return u8::try_from(code).unwrap_or(b'?');
    }
    if let Some(index) = CP1252_HIGH
        .iter()
        .position(|&mapped| mapped != 0 && u32::from(mapped) == code)
    {
        return 0x80 + u8::try_from(index).unwrap_or(0);
    }
    if (0x80..0xA0).contains(&code) && CP1252_HIGH[(code - 0x80) as usize] == 0 {
        return u8::try_from(code).unwrap_or(b'?');
    }
    b'?'
}

#[cfg(test)]
mod tests {
    use super::TextEncoding;

    #[test]
    fn ansi_decodes_code_page_specials() {
        let text = TextEncoding::Ansi.decode(&[b'a', 0x80, 0xE9, 0x81]);
        assert_eq!(text, "a\u{20AC}\u{E9}\u{81}");
    }

    #[test]
    fn ansi_encodes_back_and_replaces_unmappable() {
        let bytes = TextEncoding::Ansi.encode("\u{20AC}\u{E9}\u{4E2D}");
        assert_eq!(bytes.as_ref(), &[0x80, 0xE9, b'?']);
    }

    #[test]
    fn utf8_decoding_is_lossy() {
        let text = TextEncoding::Utf8.decode(&[b'o', b'k', 0xFF]);
        assert_eq!(text, "ok\u{FFFD}");
    }

    #[test]
    fn none_is_an_alias_for_utf8() {
        let parsed: TextEncoding = serde_json::from_str("\"none\"").expect("parse encoding");
        assert_eq!(parsed, TextEncoding::Utf8);
        let parsed: TextEncoding = serde_json::from_str("\"ansi\"").expect("parse encoding");
        assert_eq!(parsed, TextEncoding::Ansi);
    }
}
