// Turns a decoded QR payload into a navigation target without losing the payload.

use crate::types::NormalizedResult;
use regex::Regex;
use std::sync::LazyLock;

/// `scheme://` where scheme follows RFC 3986 (`alpha *( alpha / digit / "+" / "-" / "." )`).
static SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("scheme regex is valid")
});

/// Normalize a raw decoded payload.
///
/// - already has a `scheme://` prefix: passed through unchanged
/// - contains a `.` and no whitespace (looks like a bare domain): `https://` is prepended
/// - anything else: left as is
///
/// `raw_text` always carries the payload verbatim.
pub fn normalize(raw_text: &str) -> NormalizedResult {
    let canonical_url = if has_scheme(raw_text) {
        raw_text.to_owned()
    } else if looks_like_bare_domain(raw_text) {
        format!("https://{raw_text}")
    } else {
        raw_text.to_owned()
    };

    NormalizedResult {
        canonical_url,
        raw_text: raw_text.to_owned(),
    }
}

fn has_scheme(text: &str) -> bool {
    SCHEME_RE.is_match(text)
}

fn looks_like_bare_domain(text: &str) -> bool {
    text.contains('.') && !text.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(raw: &str) -> (String, String) {
        let r = normalize(raw);
        (r.canonical_url, r.raw_text)
    }

    #[test]
    fn table() {
        let cases = [
            ("example.com", "https://example.com"),
            ("https://a.com/x", "https://a.com/x"),
            ("hello world", "hello world"),
            ("ftp://host", "ftp://host"),
            ("shop.example", "https://shop.example"),
            ("HTTP://UPPER.case", "HTTP://UPPER.case"),
            ("git+ssh://repo", "git+ssh://repo"),
            ("plaintext", "plaintext"),
            ("", ""),
        ];
        for (raw, want) in cases {
            assert_eq!(pair(raw), (want.to_string(), raw.to_string()), "input {raw:?}");
        }
    }

    #[test]
    fn heuristic_quirks_are_preserved() {
        // Version strings and abbreviations still look like domains.
        assert_eq!(normalize("v1.2.3").canonical_url, "https://v1.2.3");
        assert_eq!(normalize("e.g.").canonical_url, "https://e.g.");
        // A dot with any whitespace, tabs and newlines included, is left alone.
        assert_eq!(normalize("a.b\tc").canonical_url, "a.b\tc");
        assert_eq!(normalize("example.com\n").canonical_url, "example.com\n");
    }

    #[test]
    fn scheme_must_lead() {
        assert_eq!(normalize("see http://x.y").canonical_url, "see http://x.y");
        assert_eq!(normalize("1http://x.y").canonical_url, "https://1http://x.y");
        // "mailto:" has no "//" so falls through to the domain heuristic.
        assert_eq!(normalize("mailto:a@b.c").canonical_url, "https://mailto:a@b.c");
    }
}
