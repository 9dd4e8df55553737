//! Bidirectional map between a path (ordered sequence of non-empty segments)
//! and a URI-component string used as an in-memory key.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// An ordered finite sequence of non-empty segments. The empty sequence
/// denotes the root directory.
pub type PathSegments = Vec<String>;

/// Reserve `/` (the join separator) and the usual `CONTROLS` set; everything
/// else — including spaces and non-ASCII bytes — passes through
/// `utf8_percent_encode` unescaped only if already a "safe" ASCII byte, so
/// in practice unicode segments are still escaped by the underlying UTF-8
/// percent-encoding machinery.
const SEGMENT: &AsciiSet = &CONTROLS.add(b'/').add(b'%');

/// Percent-encode each segment and join with `/`.
pub fn encode(path: &[String]) -> String {
    path.iter()
        .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Split on `/` and percent-decode each piece.
///
/// The empty string decodes to the root (empty segment list), matching
/// `encode(&[]) == ""`.
pub fn decode(uri: &str) -> PathSegments {
    if uri.is_empty() {
        return Vec::new();
    }
    uri.split('/')
        .map(|seg| {
            percent_decode_str(seg)
                .decode_utf8_lossy()
                .into_owned()
        })
        .collect()
}
