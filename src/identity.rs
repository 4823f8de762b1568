//! Identity normalization.
//!
//! Every identity field goes through one of these functions before it is used
//! as a dedup or join key. Nothing here fails: junk input normalizes to a
//! best-effort string, and missing input stays `None`.

/// Separator between components of a composite key. Never appears in
/// normalized text since whitespace and control characters are stripped.
const KEY_SEPARATOR: char = '\u{1f}';

/// Cell contents that spreadsheet exports use for a missing value.
const MISSING_MARKERS: [&str; 4] = ["", "nan", "none", "null"];

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn non_missing(value: String) -> Option<String> {
    if MISSING_MARKERS.contains(&value.as_str()) {
        None
    } else {
        Some(value)
    }
}

/// Normalize a name part: lower-cased with all whitespace removed
pub fn normalize_name(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    non_missing(strip_whitespace(&raw.trim().to_lowercase()))
}

/// Normalize a login-style ID: lower-cased, whitespace removed, and anything
/// from the first `@` onward dropped (`JS123@school.edu` → `js123`)
pub fn normalize_login(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim().to_lowercase();
    let local = raw.split('@').next().unwrap_or_default();
    non_missing(strip_whitespace(local))
}

/// Normalize a numeric student ID. Float exports (`1234567.0`) lose their
/// fractional zero so they compare equal to integer exports.
pub fn normalize_id(raw: Option<&str>) -> Option<String> {
    let id = normalize_login(raw)?;
    match id.strip_suffix(".0") {
        Some(int_part) if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) => {
            Some(int_part.to_string())
        }
        _ => Some(id),
    }
}

/// Composite full name from already-normalized parts; `None` unless both
/// parts are present
pub fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(first), Some(last)) => non_missing(strip_whitespace(&format!("{first}{last}"))),
        _ => None,
    }
}

/// Join key components into one comparable key; `None` if any component is
/// missing, so a partially-known identity never matches anything
pub fn composite_key<'a, I>(parts: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut key = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        let part = part?;
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Canonical text for a numeric-looking cell: `25.0` → `25`, anything else
/// trimmed as-is. Used for lookup-table and answer-key comparisons.
pub fn canonical_number(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_lowercased_and_despaced() {
        assert_eq!(normalize_name(Some("  Mary Ann ")), Some("maryann".to_string()));
        assert_eq!(normalize_name(None), None);
        assert_eq!(normalize_name(Some("   ")), None);
        assert_eq!(normalize_name(Some("NaN")), None);
    }

    #[test]
    fn login_drops_domain_suffix() {
        assert_eq!(normalize_login(Some("JS123@Cornell.edu")), Some("js123".to_string()));
        assert_eq!(normalize_login(Some(" js 123 ")), Some("js123".to_string()));
        assert_eq!(normalize_login(Some("@cornell.edu")), None);
        assert_eq!(normalize_login(Some("a@b@c")), Some("a".to_string()));
    }

    #[test]
    fn numeric_id_drops_float_suffix() {
        assert_eq!(normalize_id(Some("1234567.0")), Some("1234567".to_string()));
        assert_eq!(normalize_id(Some("1234567")), Some("1234567".to_string()));
        assert_eq!(normalize_id(Some("ab.0")), Some("ab.0".to_string()));
        assert_eq!(normalize_id(Some("nan")), None);
    }

    #[test]
    fn full_name_needs_both_parts() {
        assert_eq!(full_name(Some("jane"), Some("smith")), Some("janesmith".to_string()));
        assert_eq!(full_name(Some("jane"), None), None);
    }

    #[test]
    fn composite_key_is_null_when_any_part_is_null() {
        assert!(composite_key([Some("a"), None]).is_none());
        assert!(composite_key(std::iter::empty()).is_none());
        let ab = composite_key([Some("a"), Some("b")]).unwrap();
        let ba = composite_key([Some("b"), Some("a")]).unwrap();
        assert_ne!(ab, ba);
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(
            composite_key([Some("ab"), Some("c")]),
            composite_key([Some("a"), Some("bc")])
        );
    }

    #[test]
    fn canonical_number_collapses_float_integers() {
        assert_eq!(canonical_number("25.0"), "25");
        assert_eq!(canonical_number(" 3 "), "3");
        assert_eq!(canonical_number("2.5"), "2.5");
        assert_eq!(canonical_number("A"), "A");
    }
}
