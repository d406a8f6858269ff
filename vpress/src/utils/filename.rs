//! Sanitization of untrusted display names before they participate in
//! derived filesystem paths.

/// Characters that are invalid in filenames on at least one supported
/// platform.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a sanitized name, in characters.
const MAX_LEN: usize = 96;

/// Sanitize a string for use as a filename component.
///
/// Control characters and platform-invalid characters are replaced with a
/// single underscore (consecutive runs collapse), leading/trailing spaces and
/// dots are trimmed, and the result is capped at [`MAX_LEN`] characters. An
/// input that sanitizes to nothing yields `"unnamed"`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len().min(MAX_LEN));
    let mut last_was_replacement = false;

    for c in input.chars().take(MAX_LEN) {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    trimmed.to_string()
}
