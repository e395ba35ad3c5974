//! Input validation for the registration dialogue.

use std::sync::LazyLock;

use regex::Regex;

/// Names are Latin letters or CJK unified ideographs, nothing else.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x{4e00}-\x{9fa5}A-Za-z]+$").unwrap());

/// Shortest accepted phone number, in digits.
pub const PHONE_MIN_DIGITS: usize = 7;
/// Longest accepted phone number, in digits.
pub const PHONE_MAX_DIGITS: usize = 10;

/// Whether `text` is an acceptable name once surrounding whitespace is removed.
pub fn validate_name(text: &str) -> bool {
    NAME_PATTERN.is_match(text.trim())
}

/// Whether `text` is an acceptable phone number once surrounding whitespace
/// is removed: 7 to 10 ASCII digits.
pub fn validate_phone(text: &str) -> bool {
    let phone = text.trim();
    (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&phone.len())
        && phone.bytes().all(|b| b.is_ascii_digit())
}
