//! Notebook header parsing.
//!
//! Every known `.rm` generation starts with the same ASCII marker followed by
//! a decimal version and padding, e.g. `reMarkable .lines file, version=6          `.

/// Marker common to all known notebook formats
pub const HEADER_PREFIX: &[u8] = b"reMarkable .lines file, version=";

/// Number of leading bytes inspected for the version marker
pub const HEADER_LEN: usize = 64;

/// First format generation handled by the v6 backend
pub const V6: u32 = 6;

/// Parse the format version out of the first bytes of a notebook.
///
/// Returns `None` when the prefix is missing or the version is not a number.
pub fn parse_version(header: &[u8]) -> Option<u32> {
    let header = &header[..header.len().min(HEADER_LEN)];
    let rest = header.strip_prefix(HEADER_PREFIX)?;
    let rest = String::from_utf8_lossy(rest);
    rest.split_whitespace().next()?.parse().ok()
}
