//! Naming convention for bundle identifiers.
//!
//! Harness output directories are named like `<testcase>_client<suffix>` or
//! `<testcase>_server<suffix>`, where the suffix is six characters of run
//! counter. Report consumers display a compacted form of that name.

/// Number of trailing UTF-16 code units dropped from the compacted identifier.
const SUFFIX_LEN: usize = 6;

/// Derive the short display identifier.
///
/// The first `client` becomes `c`, the first `server` becomes `s`, then the
/// trailing six UTF-16 code units are dropped, matching how report consumers
/// measure names. Names shorter than six units after substitution are cut
/// with an end index counted back from the end (`len - (6 - len)`, floored
/// at zero). A cut through a surrogate pair leaves U+FFFD.
pub fn short_identifier(identifier: &str) -> String {
    let compacted = identifier
        .replacen("client", "c", 1)
        .replacen("server", "s", 1);

    let units: Vec<u16> = compacted.encode_utf16().collect();
    let len = units.len();
    let end = if len >= SUFFIX_LEN {
        len - SUFFIX_LEN
    } else {
        len.saturating_sub(SUFFIX_LEN - len)
    };

    String::from_utf16_lossy(&units[..end])
}
