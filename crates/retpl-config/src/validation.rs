//! Validation utilities and regex patterns

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use url::Url;
use validator::ValidationError;

/// Regex pattern for numeric strings (e.g., "0", "42")
pub static NUMERIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("Invalid numeric regex pattern"));

/// Characters that cannot appear in a path on common filesystems
const INVALID_PATH_CHARS: [char; 6] = ['<', '>', '"', '|', '?', '*'];

/// Validate that a string holds a base-10 integer
pub fn validate_numeric(value: &str) -> Result<(), ValidationError> {
    if NUMERIC_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("not_numeric"))
    }
}

/// Validate that a path exists on the filesystem
///
/// An empty string means the field is unset and passes.
pub fn validate_existing_path(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    if Path::new(value).exists() {
        Ok(())
    } else {
        Err(ValidationError::new("path_does_not_exist"))
    }
}

/// Validate that a string is a URL or a plausible filesystem path
///
/// An empty string means the field is unset and passes. Anything that
/// parses as an absolute URL is accepted; otherwise the value must be free
/// of whitespace and of characters no filesystem accepts.
pub fn validate_uri(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    if Url::parse(value).is_ok() {
        return Ok(());
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("invalid_uri"));
    }
    if value.chars().any(|c| INVALID_PATH_CHARS.contains(&c)) {
        return Err(ValidationError::new("invalid_uri"));
    }
    Ok(())
}
