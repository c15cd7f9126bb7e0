//! Single-pass scanner that redacts email addresses and phone numbers
//! without a dictionary.
//!
//! All delimiters are ASCII, so every span boundary falls on a UTF-8
//! character boundary and slicing the original `&str` is safe.

use crate::REDACTED;

const PHONE_MIN_DIGITS: usize = 10;
const PHONE_MAX_DIGITS: usize = 15;

/// Replace every email address and phone number in `input` with `[REDACTED]`.
pub fn redact_generic(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut last_write = 0;
    let mut i = 0;

    while i < bytes.len() {
        let span = match bytes[i] {
            b'@' => scan_email_at(bytes, i),
            b'+' | b'0'..=b'9' => scan_phone_at(bytes, i),
            _ => None,
        };
        match span {
            // An email found at '@' may start before text already emitted
            // only if that text was itself a phone match; skip such overlaps.
            Some((start, end)) if start >= last_write => {
                out.push_str(&input[last_write..start]);
                out.push_str(REDACTED);
                last_write = end;
                i = end;
            }
            _ => i += 1,
        }
    }

    if last_write == 0 {
        return input.to_string();
    }
    out.push_str(&input[last_write..]);
    out
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_alpha_underscore(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_email_local(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'-')
}

fn is_domain_label(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

/// Email span around the `@` at `at`, as `(start, end)` byte offsets.
fn scan_email_at(s: &[u8], at: usize) -> Option<(usize, usize)> {
    let n = s.len();
    if at == 0 || at + 1 >= n {
        return None;
    }

    let mut local_start = at;
    while local_start > 0 && is_email_local(s[local_start - 1]) {
        local_start -= 1;
    }
    let local = &s[local_start..at];
    if local.is_empty() || local[0] == b'.' || local[local.len() - 1] == b'.' {
        return None;
    }
    if local.windows(2).any(|w| w == b"..") {
        return None;
    }

    let mut r = at + 1;
    let mut label_len = 0;
    let mut last_dot = None;
    while r < n {
        let ch = s[r];
        if is_domain_label(ch) {
            label_len += 1;
        } else if ch == b'.' {
            if label_len == 0 || s[r - 1] == b'-' {
                return None;
            }
            last_dot = Some(r);
            label_len = 0;
        } else {
            break;
        }
        r += 1;
    }
    let domain_end = r;
    if label_len == 0 || s[domain_end - 1] == b'-' {
        return None;
    }
    let tld_len = domain_end - last_dot? - 1;
    if !(2..=24).contains(&tld_len) {
        return None;
    }

    if local_start > 0 && is_word(s[local_start - 1]) {
        return None;
    }
    if domain_end < n && is_word(s[domain_end]) {
        return None;
    }
    Some((local_start, domain_end))
}

/// Phone number span starting at `start`. Trailing separators are not part
/// of the span.
fn scan_phone_at(s: &[u8], start: usize) -> Option<(usize, usize)> {
    let n = s.len();
    // Only the beginning of a digit run can start a phone number.
    if start > 0 && (s[start - 1].is_ascii_digit() || s[start - 1] == b'+') {
        return None;
    }

    let mut j = start;
    let mut end = start;
    let mut digits = 0;
    let mut seen_plus = false;
    let mut seen_separator = false;
    let mut paren_depth = 0usize;

    if s[j] == b'+' {
        seen_plus = true;
        j += 1;
        if j >= n {
            return None;
        }
    }

    while j < n {
        match s[j] {
            b'0'..=b'9' => {
                digits += 1;
                end = j + 1;
            }
            b' ' | b'-' | b'.' => seen_separator = true,
            b'(' => {
                paren_depth += 1;
                seen_separator = true;
            }
            b')' => {
                if paren_depth == 0 {
                    return None;
                }
                paren_depth -= 1;
                end = j + 1;
            }
            _ => break,
        }
        j += 1;
    }

    if paren_depth != 0 || !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits) {
        return None;
    }
    if start > 0 && is_alpha_underscore(s[start - 1]) {
        return None;
    }
    if end < n && is_alpha_underscore(s[end]) {
        return None;
    }
    // Long unpunctuated digit runs are ids, not phones, unless they carry an
    // international `00` prefix.
    if !seen_separator && !seen_plus && digits >= 12 && !s[start..].starts_with(b"00") {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_redacted() {
        assert_eq!(
            redact_generic("contact jane.doe@example.com today"),
            "contact [REDACTED] today"
        );
    }

    #[test]
    fn test_invalid_emails_untouched() {
        assert_eq!(redact_generic("a@b"), "a@b");
        assert_eq!(redact_generic("x..y@example.com"), "x..y@example.com");
        assert_eq!(redact_generic("user@example.c"), "user@example.c");
        assert_eq!(redact_generic("@handle"), "@handle");
    }

    #[test]
    fn test_phone_redacted() {
        assert_eq!(
            redact_generic("call +1 (415) 555-0100 now"),
            "call [REDACTED] now"
        );
        assert_eq!(redact_generic("tel 4155550100"), "tel [REDACTED]");
    }

    #[test]
    fn test_short_numbers_and_ids_untouched() {
        assert_eq!(redact_generic("order 12345"), "order 12345");
        assert_eq!(redact_generic("id 123456789012"), "id 123456789012");
        assert_eq!(redact_generic("abc4155550100"), "abc4155550100");
    }

    #[test]
    fn test_international_prefix_run() {
        assert_eq!(redact_generic("00441234567890"), "[REDACTED]");
    }

    #[test]
    fn test_non_ascii_text_preserved() {
        assert_eq!(
            redact_generic("héllo josé@example.org ✓"),
            "héllo josé@example.org ✓"
        );
        assert_eq!(redact_generic("ünïcode only"), "ünïcode only");
    }
}
