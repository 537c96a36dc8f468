//! Phone number normalization
//!
//! All correlation in the pipeline happens on the canonical form produced by
//! [`normalize_phone`]: digits only, national trunk prefix `8` rewritten to the
//! country code `7`, ten-digit local numbers prefixed with `7`, then `+`.

/// Strip everything except ASCII digits
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Canonical `+7XXXXXXXXXX`-style form, or `None` when the input has no digits
///
/// ```
/// use callflow_common::phone::normalize_phone;
///
/// assert_eq!(normalize_phone("8 (967) 555-81-85").as_deref(), Some("+79675558185"));
/// assert_eq!(normalize_phone("+79675558185").as_deref(), Some("+79675558185"));
/// assert_eq!(normalize_phone("79675558185").as_deref(), Some("+79675558185"));
/// assert_eq!(normalize_phone("anonymous"), None);
/// ```
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = digits_only(raw);
    if digits.is_empty() {
        return None;
    }

    let canonical = match digits.len() {
        11 if digits.starts_with('8') => format!("7{}", &digits[1..]),
        10 => format!("7{}", digits),
        _ => digits,
    };

    Some(format!("+{}", canonical))
}

/// Whether two identifiers denote the same line or number
///
/// Short internal extensions (e.g. `100`) compare on their digits; anything
/// long enough to be a full number compares on its canonical form.
pub fn same_line(a: &str, b: &str) -> bool {
    let (da, db) = (digits_only(a), digits_only(b));
    if da.is_empty() || db.is_empty() {
        return false;
    }
    if da == db {
        return true;
    }
    da.len() >= 10 && db.len() >= 10 && normalize_phone(&da) == normalize_phone(&db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regional_formats_share_canonical_form() {
        let forms = ["8 (967) 555-81-85", "+79675558185", "79675558185", "967 555 81 85"];
        for form in forms {
            assert_eq!(
                normalize_phone(form).as_deref(),
                Some("+79675558185"),
                "{} should normalize to +79675558185",
                form
            );
        }
    }

    #[test]
    fn test_foreign_and_short_numbers_keep_digits() {
        assert_eq!(normalize_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
        assert_eq!(normalize_phone("100").as_deref(), Some("+100"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("+-() "), None);
    }

    #[test]
    fn test_same_line() {
        assert!(same_line("100", "100"));
        assert!(!same_line("100", "101"));
        assert!(same_line("8 495 000-00-00", "+74950000000"));
        assert!(!same_line("", ""));
    }
}
