//! Text normalization applied to every extracted field.
//!
//! The steps run in a fixed order and none of them can fail:
//! 1. **Encoding repair**: round-trip the text through the page's declared encoding,
//!    substituting replacement characters when the bytes do not decode cleanly
//! 2. **Transliteration**: map non-ASCII characters to a plain ASCII approximation,
//!    leaving ASCII (line breaks and tabs included) as it is
//! 3. **Link stripping**: drop lines that are nothing but a bare `http(s)://` URL
//! 4. **Whitespace collapse**: every whitespace run becomes a single space

use deunicode::deunicode_char;
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use tracing::debug;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static BARE_URL_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*https?://\S*\s*$").unwrap());

/// Placeholder for glyphs that have no ASCII approximation.
const TOFU: &str = "?";

/// Normalize raw extracted text for storage.
///
/// # Arguments
///
/// * `raw` - Text as collected from the document
/// * `declared_encoding` - Encoding label the page declared (e.g. `"utf-8"`, `"windows-1252"`)
///
/// # Returns
///
/// Trimmed ASCII text with single spaces, possibly empty.
pub fn normalize(raw: &str, declared_encoding: &str) -> String {
    let repaired = repair_encoding(raw, declared_encoding);
    let ascii = transliterate(&repaired);
    let without_links = strip_bare_url_lines(&ascii);
    collapse_whitespace(&without_links)
}

/// Re-encode as UTF-8 and decode with the declared encoding.
///
/// Unknown labels and UTF-8 leave the text untouched. Bytes that are invalid in the
/// declared encoding become U+FFFD instead of aborting.
pub fn repair_encoding<'a>(text: &'a str, declared_encoding: &str) -> Cow<'a, str> {
    let Some(encoding) = Encoding::for_label(declared_encoding.trim().as_bytes()) else {
        debug!(declared_encoding, "Unknown encoding label; leaving text as-is");
        return Cow::Borrowed(text);
    };
    if encoding == UTF_8 {
        return Cow::Borrowed(text);
    }

    let bytes = text.as_bytes();
    match encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(decoded) => Cow::Owned(decoded.into_owned()),
        None => {
            let (decoded, _had_errors) = encoding.decode_without_bom_handling(bytes);
            debug!(encoding = encoding.name(), "Lossy decode after strict decode failed");
            Cow::Owned(decoded.into_owned())
        }
    }
}

/// Transliterate to ASCII. Glyphs without a mapping become `?`.
///
/// ASCII characters are copied unchanged so line structure survives for the later
/// steps.
pub fn transliterate(text: &str) -> Cow<'_, str> {
    if text.is_ascii() {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(deunicode_char(c).unwrap_or(TOFU));
        }
    }
    Cow::Owned(out)
}

/// Remove every line that consists solely of an absolute http(s) URL.
pub fn strip_bare_url_lines(text: &str) -> Cow<'_, str> {
    if !text.contains("http") {
        return Cow::Borrowed(text);
    }
    let kept = text
        .lines()
        .filter(|line| !BARE_URL_LINE_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n");
    Cow::Owned(kept)
}

/// Collapse whitespace runs to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_is_identity() {
        assert_eq!(repair_encoding("Café au lait", "utf-8"), "Café au lait");
        assert_eq!(repair_encoding("Café", "UTF8"), "Café");
    }

    #[test]
    fn test_unknown_label_is_identity() {
        assert_eq!(repair_encoding("naïve", "not-a-charset"), "naïve");
    }

    #[test]
    fn test_single_byte_encoding_never_fails() {
        // UTF-8 bytes read as windows-1252 produce mojibake, not an error.
        let repaired = repair_encoding("é", "windows-1252");
        assert_eq!(repaired, "Ã©");
    }

    #[test]
    fn test_invalid_bytes_become_replacement_chars() {
        // Three bytes cannot be a complete UTF-16 sequence; the dangling byte is replaced.
        let repaired = repair_encoding("abc", "utf-16le");
        assert!(repaired.ends_with('\u{FFFD}'));
    }

    #[test]
    fn test_transliterate() {
        assert_eq!(transliterate("Ærøskøbing café"), "AEroskobing cafe");
        assert_eq!(transliterate("Привет"), "Privet");
        assert_eq!(transliterate("“quoted” – dash"), "\"quoted\" - dash");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\n b\t\tc  "), "a b c");
        assert_eq!(collapse_whitespace(" \n\t "), "");
    }

    #[test]
    fn test_strip_bare_url_lines() {
        let text = "Lead paragraph\nhttps://example.com/share?id=1\nSecond paragraph";
        assert_eq!(strip_bare_url_lines(text), "Lead paragraph\nSecond paragraph");
    }

    #[test]
    fn test_inline_urls_survive() {
        let text = "Read more at https://example.com/story today";
        assert_eq!(strip_bare_url_lines(text), text);
    }

    #[test]
    fn test_normalize_full_pipeline() {
        let raw = "  Zoë’s   report\nhttp://tracker.example.com/x\n\tcontinues  ";
        assert_eq!(normalize(raw, "utf-8"), "Zoe's report continues");
    }

    #[test]
    fn test_transliterate_keeps_line_breaks_and_tabs() {
        assert_eq!(transliterate("café\nbar\tbaz"), "cafe\nbar\tbaz");
        assert_eq!(transliterate("plain\r\nascii"), "plain\r\nascii");
    }

    #[test]
    fn test_normalize_non_ascii_with_line_breaks() {
        assert_eq!(
            normalize("The café council\nvoted\tto reopen", "utf-8"),
            "The cafe council voted to reopen"
        );
        assert_eq!(
            normalize("Café\nhttps://example.com/share\nNext", "utf-8"),
            "Cafe Next"
        );
    }

    #[test]
    fn test_normalize_only_url_is_empty() {
        assert_eq!(normalize("https://example.com/only-a-link", "utf-8"), "");
    }
}
