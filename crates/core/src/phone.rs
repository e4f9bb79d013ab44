//! Phone number normalization
//!
//! Dialed and caller numbers arrive in a handful of shapes depending on the
//! carrier: `+1XXXXXXXXXX`, `1XXXXXXXXXX`, bare ten digits, or any of those
//! with punctuation. Everything is normalized to E.164 (`+1XXXXXXXXXX`)
//! before it is used as a lookup key.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;

static NON_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d]").unwrap());

/// Normalize a phone number to E.164.
///
/// Accepts ten digits, eleven digits with a leading `1`, or an already
/// normalized `+1` number, with any punctuation or whitespace mixed in.
/// Everything else is an error. Idempotent for accepted inputs.
pub fn normalize_e164(raw: &str) -> crate::Result<String> {
    let digits = NON_DIGIT.replace_all(raw, "");

    match digits.len() {
        10 => Ok(format!("+1{digits}")),
        11 if digits.starts_with('1') => Ok(format!("+{digits}")),
        _ => Err(Error::InvalidPhoneNumber(raw.to_string())),
    }
}
