//! Canonical URL normalisation.
//!
//! Strips the query string, then collapses parameter-like path segments
//! in a fixed order: numeric ids, UUIDs, Mongo object ids, file names,
//! and 32/40/64-char hex digests. Normalising an already-normalised URL
//! is a fixed point.

use regex::Regex;

/// Segment classifiers, compiled once at construction.
pub struct UrlNormalizer {
    numeric: Regex,
    uuid: Regex,
    object_id: Regex,
    file_ext: Regex,
    hex32: Regex,
    hex40: Regex,
    hex64: Regex,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlNormalizer {
    pub fn new() -> Self {
        // Anchored per path segment, so they cannot panic at runtime and
        // cannot straddle separators.
        Self {
            numeric: Regex::new(r"^[0-9]+$").expect("static regex"),
            uuid: Regex::new(
                r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
            )
            .expect("static regex"),
            object_id: Regex::new(r"^[0-9a-fA-F]{24}$").expect("static regex"),
            file_ext: Regex::new(
                r"(?i)^[^/]+\.(jpg|jpeg|png|gif|svg|webp|pdf|doc|docx|xls|xlsx)$",
            )
            .expect("static regex"),
            hex32: Regex::new(r"^[0-9a-fA-F]{32}$").expect("static regex"),
            hex40: Regex::new(r"^[0-9a-fA-F]{40}$").expect("static regex"),
            hex64: Regex::new(r"^[0-9a-fA-F]{64}$").expect("static regex"),
        }
    }

    /// Normalise one URL (absolute or path-only).
    pub fn normalize(&self, url: &str) -> String {
        let without_query = url.split('?').next().unwrap_or(url);

        // Leave a `scheme://authority` prefix untouched.
        let (prefix, path) = match without_query.find("://") {
            Some(scheme_end) => {
                let after_scheme = scheme_end + 3;
                match without_query[after_scheme..].find('/') {
                    Some(path_start) => {
                        without_query.split_at(after_scheme + path_start)
                    }
                    None => (without_query, ""),
                }
            }
            None => ("", without_query),
        };

        let normalized_path: String = path
            .split('/')
            .map(|segment| self.normalize_segment(segment))
            .collect::<Vec<_>>()
            .join("/");

        format!("{prefix}{normalized_path}")
    }

    /// Classification order matters: numeric ids first, digests last.
    fn normalize_segment<'a>(&self, segment: &'a str) -> &'a str {
        if segment.is_empty() {
            return segment;
        }
        if self.numeric.is_match(segment) {
            "{id}"
        } else if self.uuid.is_match(segment) {
            "{uuid}"
        } else if self.object_id.is_match(segment) {
            "{objectId}"
        } else if self.file_ext.is_match(segment) {
            "{file}"
        } else if self.hex32.is_match(segment) {
            "{hash}"
        } else if self.hex40.is_match(segment) {
            "{sha1}"
        } else if self.hex64.is_match(segment) {
            "{sha256}"
        } else {
            segment
        }
    }
}
