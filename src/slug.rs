//! Document slugs.
//!
//! A [`Slug`] is the only identifier the stores and the insight cache accept.
//! Construction validates the character set, which doubles as the
//! path-traversal guard for the document repository and guarantees the slug
//! never contains the `__` separator used in cache file names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on slug length; keeps file names well under filesystem limits.
pub const MAX_SLUG_LEN: usize = 80;

/// Validated, URL-safe document identifier: `[a-z0-9]+(-[a-z0-9]+)*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    /// Accepts `s` verbatim if it is already a well-formed slug.
    pub fn parse(s: &str) -> Result<Self> {
        if is_valid(s) {
            Ok(Slug(s.to_string()))
        } else {
            Err(Error::InvalidSlug(s.to_string()))
        }
    }

    /// Derives a slug from free text (title, course code, filename stem).
    pub fn derive(text: &str) -> Result<Self> {
        let slug = slugify(text);
        if slug.is_empty() {
            return Err(Error::InvalidSlug(text.to_string()));
        }
        Ok(Slug(slug))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `base-n`, truncated so the suffix always fits.
    pub fn with_suffix(&self, n: u32) -> Slug {
        let suffix = format!("-{}", n);
        let keep = MAX_SLUG_LEN.saturating_sub(suffix.len()).min(self.0.len());
        let head = self.0[..keep].trim_end_matches('-');
        Slug(format!("{}{}", head, suffix))
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Slug {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if is_valid(&s) {
            Ok(Slug(s))
        } else {
            Err(Error::InvalidSlug(s))
        }
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

fn is_valid(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_SLUG_LEN
        && !s.starts_with('-')
        && !s.ends_with('-')
        && !s.contains("--")
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Lowercases and collapses every run of non `[a-z0-9]` characters to `-`.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if out.len() > MAX_SLUG_LEN {
        out.truncate(MAX_SLUG_LEN);
        while out.ends_with('-') {
            out.pop();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Intro to CS!! "), "intro-to-cs");
        assert_eq!(slugify("CSE 142 -- Reges -- Fall -- 2024"), "cse-142-reges-fall-2024");
        assert_eq!(slugify("my_syllabus.v2.pdf"), "my-syllabus-v2-pdf");
        assert_eq!(slugify("___"), "");
    }

    #[test]
    fn derive_rejects_text_without_alphanumerics() {
        assert!(matches!(Slug::derive("?!"), Err(Error::InvalidSlug(_))));
    }

    #[test]
    fn parse_rejects_traversal_and_separator() {
        for bad in ["../etc", "a/b", "a__b", "A", "-a", "a-", "a--b", "a.b", ""] {
            assert!(Slug::parse(bad).is_err(), "{bad} should be rejected");
        }
        assert_eq!(Slug::parse("intro-to-cs").unwrap().as_str(), "intro-to-cs");
    }

    #[test]
    fn long_text_is_truncated_cleanly() {
        let long = "word ".repeat(40);
        let slug = Slug::derive(&long).unwrap();
        assert!(slug.as_str().len() <= MAX_SLUG_LEN);
        assert!(!slug.as_str().ends_with('-'));
        let suffixed = slug.with_suffix(12);
        assert!(suffixed.as_str().len() <= MAX_SLUG_LEN);
        assert!(suffixed.as_str().ends_with("-12"));
        assert!(Slug::parse(suffixed.as_str()).is_ok());
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: Slug = serde_json::from_str("\"intro-to-cs\"").unwrap();
        assert_eq!(ok.as_str(), "intro-to-cs");
        assert!(serde_json::from_str::<Slug>("\"../x\"").is_err());
    }
}
