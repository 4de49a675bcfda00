//! Format-insensitive content fingerprints
//!
//! Provides [`Fingerprint`], a 4-byte (8 hex character) identifier derived
//! from the *visible* text of a passage. Markup is stripped before hashing,
//! so two passages that differ only in formatting share a fingerprint.

use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, TagEnd};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Number of digest bytes kept in a fingerprint
pub const FINGERPRINT_BYTES: usize = 4;

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static EMPHASIS_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[*_~`]+").expect("valid regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Short content fingerprint (first 4 bytes of SHA-256 over normalized text)
///
/// Collisions are accepted as low-stakes: a miss only falls back to the
/// unexpanded passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Create a fingerprint from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; FINGERPRINT_BYTES]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }

    /// Fingerprint raw markup (normalizes first)
    #[inline]
    #[must_use]
    pub fn of(raw: &str) -> Self {
        Self::of_normalized(&normalize(raw))
    }

    /// Fingerprint text that is already normalized
    #[must_use]
    pub fn of_normalized(normalized: &str) -> Self {
        let digest = Sha256::digest(normalized.as_bytes());
        let mut bytes = [0u8; FINGERPRINT_BYTES];
        bytes.copy_from_slice(&digest[..FINGERPRINT_BYTES]);
        Self(bytes)
    }
}

/// Fingerprint raw markup, returning the 8-character hex form
#[inline]
#[must_use]
pub fn fingerprint(raw: &str) -> String {
    Fingerprint::of(raw).to_string()
}

/// Reduce markup to its canonical visible text
///
/// Strips HTML tags, emphasis/code/strikethrough markers, heading and list
/// prefixes, and reduces links and images to their labels. The result is
/// lower-cased with whitespace collapsed to single spaces.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut visible = String::with_capacity(raw.len());
    for event in Parser::new_ext(raw, options) {
        match event {
            Event::Text(text) | Event::Code(text) => visible.push_str(&text),
            Event::Html(html) | Event::InlineHtml(html) => {
                visible.push_str(&HTML_TAG_RE.replace_all(&html, ""));
            }
            Event::SoftBreak | Event::HardBreak => visible.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(..)
                | TagEnd::Item
                | TagEnd::BlockQuote(..)
                | TagEnd::CodeBlock
                | TagEnd::TableCell,
            ) => visible.push(' '),
            _ => {}
        }
    }

    // Unbalanced markers survive the parser as literal text
    let stripped = HTML_TAG_RE.replace_all(&visible, "");
    let stripped = strip_stray_markers(&stripped);
    let lowered = stripped.to_lowercase();
    WHITESPACE_RE.replace_all(lowered.trim(), " ").into_owned()
}

/// Drop marker runs at word edges; runs between two word characters
/// (`snake_case`, `a*b`) are part of the word and stay
fn strip_stray_markers(text: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in EMPHASIS_MARKER_RE.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        if before.is_some_and(is_word) && after.is_some_and(is_word) {
            out.push_str(m.as_str());
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        if bytes.len() != FINGERPRINT_BYTES {
            return Err(FingerprintError::InvalidLength {
                expected: FINGERPRINT_BYTES * 2,
                actual: s.trim().len(),
            });
        }
        let mut arr = [0u8; FINGERPRINT_BYTES];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors parsing a fingerprint from its hex form
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Wrong number of hex characters
    #[error("invalid fingerprint length: expected {expected} hex chars, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not hex
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fingerprint_is_eight_hex_chars() {
        let fp = fingerprint("Hello world");
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn formatting_does_not_change_fingerprint() {
        let plain = fingerprint("Hello world");
        assert_eq!(fingerprint("**Hello** world"), plain);
        assert_eq!(fingerprint("_Hello_ world"), plain);
        assert_eq!(fingerprint("*Hello* world"), plain);
        assert_eq!(fingerprint("~~Hello~~ world"), plain);
        assert_eq!(fingerprint("`Hello` world"), plain);
        assert_eq!(fingerprint("[Hello](https://example.com) world"), plain);
        assert_eq!(fingerprint("![Hello](/img.png) world"), plain);
        assert_eq!(fingerprint("# Hello world"), plain);
        assert_eq!(fingerprint("- Hello world"), plain);
        assert_eq!(fingerprint("1. Hello world"), plain);
        assert_eq!(fingerprint("<strong>Hello</strong> world"), plain);
        assert_eq!(fingerprint("  HELLO\n\n   world  "), plain);
    }

    #[test]
    fn different_text_differs() {
        assert_ne!(fingerprint("Hello world"), fingerprint("Goodbye world"));
    }

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize("  Some   **Bold**\ntext "), "some bold text");
        assert_eq!(normalize("<div>Inside <em>html</em></div>"), "inside html");
        assert_eq!(normalize("stray ** markers"), "stray markers");
        assert_eq!(normalize("*dangling emphasis"), "dangling emphasis");
    }

    #[test]
    fn intraword_underscores_are_significant() {
        assert_eq!(normalize("call snake_case here"), "call snake_case here");
        assert_ne!(fingerprint("snake_case"), fingerprint("snakecase"));
        assert_ne!(fingerprint("max__len"), fingerprint("maxlen"));
        // Real emphasis inside a word is still parsed away
        assert_eq!(fingerprint("un*believ*able"), fingerprint("unbelievable"));
    }

    #[test]
    fn parse_and_display_roundtrip() {
        let fp = Fingerprint::of("round trip");
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let result = "abcd".parse::<Fingerprint>();
        assert!(matches!(
            result,
            Err(FingerprintError::InvalidLength { expected: 8, actual: 4 })
        ));
        assert!("zzzzzzzz".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let fp = Fingerprint::of("serde");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{fp}\""));
        let decoded: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, fp);
    }

    proptest! {
        #[test]
        fn prop_emphasis_is_invisible(words in prop::collection::vec("[a-z]{1,8}", 1..8)) {
            let plain = words.join(" ");
            let mut emphasized = words.clone();
            emphasized[0] = format!("**{}**", emphasized[0]);
            prop_assert_eq!(fingerprint(&plain), fingerprint(&emphasized.join(" ")));
        }

        #[test]
        fn prop_whitespace_is_invisible(words in prop::collection::vec("[a-z]{1,8}", 1..8)) {
            let single = words.join(" ");
            let spread = words.join("   \n ");
            prop_assert_eq!(fingerprint(&single), fingerprint(&spread));
        }
    }
}
