//! Route prefix normalization and collision renaming

use rand::Rng;

/// Longest route prefix the control plane accepts
pub const MAX_ROUTE_PREFIX_LEN: usize = 10;

const FALLBACK_PREFIX: &str = "mcp";

/// Turn a package name into a route prefix.
///
/// The result is at most 10 characters of `[a-z0-9]` and never starts
/// with a digit: `"123-test"` becomes `"mcp123test"`, `""` becomes `"mcp"`.
pub fn normalize_route_prefix(name: &str) -> String {
    let lowered = name
        .to_lowercase()
        .replace('_', "")
        .replace("mcp", "")
        .replace('-', "");
    let mut prefix: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();

    if prefix.starts_with(|c: char| c.is_ascii_digit()) {
        prefix = format!("{}{}", FALLBACK_PREFIX, prefix);
    }
    prefix.truncate(MAX_ROUTE_PREFIX_LEN);

    if prefix.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        prefix
    }
}

/// Rename a colliding prefix: drop trailing digits, append a random
/// two-digit suffix, stay within the length limit.
pub fn mutate_route_prefix<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let trimmed = prefix.trim_end_matches(|c: char| c.is_ascii_digit());
    let stem: String = if trimmed.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        trimmed.chars().take(MAX_ROUTE_PREFIX_LEN - 2).collect()
    };

    let suffix: u8 = rng.gen_range(10..=99);
    format!("{}{}", stem, suffix)
}
