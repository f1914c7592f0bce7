// File: encoding.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// What `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// What `encodeURI` leaves alone: the component set plus URI delimiters.
const URI: &AsciiSet = &URI_COMPONENT
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'#');

const PERCENT_SETS: [&AsciiSet; 3] = [NON_ALPHANUMERIC, URI_COMPONENT, URI];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingKind {
    Entity,
    Percent,
    Double,
}

#[derive(Debug, Clone, Copy)]
enum EntityScheme {
    Named,
    NamedNumericApos,
    NamedPaddedApos,
    Decimal,
    HexLower,
    HexUpper,
}

const ENTITY_SCHEMES: [EntityScheme; 6] = [
    EntityScheme::Named,
    EntityScheme::NamedNumericApos,
    EntityScheme::NamedPaddedApos,
    EntityScheme::Decimal,
    EntityScheme::HexLower,
    EntityScheme::HexUpper,
];

fn named_entity(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\'' => Some("&apos;"),
        _ => None,
    }
}

fn encode_with(raw: &str, scheme: EntityScheme) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for c in raw.chars() {
        match scheme {
            EntityScheme::Named => match named_entity(c) {
                Some(entity) => out.push_str(entity),
                None => out.push(c),
            },
            EntityScheme::NamedNumericApos | EntityScheme::NamedPaddedApos if c == '\'' => {
                if matches!(scheme, EntityScheme::NamedNumericApos) {
                    out.push_str("&#39;");
                } else {
                    out.push_str("&#039;");
                }
            }
            EntityScheme::NamedNumericApos | EntityScheme::NamedPaddedApos => {
                match named_entity(c) {
                    Some(entity) => out.push_str(entity),
                    None => out.push(c),
                }
            }
            _ if c.is_ascii_alphanumeric() => out.push(c),
            EntityScheme::Decimal => out.push_str(&format!("&#{};", c as u32)),
            EntityScheme::HexLower => out.push_str(&format!("&#x{:x};", c as u32)),
            EntityScheme::HexUpper => out.push_str(&format!("&#x{:X};", c as u32)),
        }
    }
    out
}

fn push_distinct(forms: &mut Vec<String>, raw: &str, form: String) {
    if form != raw && !forms.contains(&form) {
        forms.push(form);
    }
}

/// HTML entity spellings of `raw` that differ from it.
pub fn entity_forms(raw: &str) -> Vec<String> {
    let mut forms = Vec::new();
    for scheme in ENTITY_SCHEMES {
        push_distinct(&mut forms, raw, encode_with(raw, scheme));
    }
    forms
}

/// Percent-encoded spellings of `raw` (upper and lower hex, `+` for space).
/// Besides escaping every non-alphanumeric byte, the reserved-character
/// choices of `encodeURIComponent` and `encodeURI` are recognized.
pub fn percent_forms(raw: &str) -> Vec<String> {
    let mut forms = Vec::new();
    for set in PERCENT_SETS {
        let upper = utf8_percent_encode(raw, set).to_string();
        push_distinct(&mut forms, raw, lower_hex_escapes(&upper));
        push_distinct(&mut forms, raw, upper.replace("%20", "+"));
        push_distinct(&mut forms, raw, upper);
    }
    forms
}

/// Two-layer encodings: percent over percent, entity over entity, and percent
/// over entity.
pub fn double_forms(raw: &str) -> Vec<String> {
    let mut forms = Vec::new();
    let percent = percent_forms(raw);
    let entity = entity_forms(raw);

    for once in &percent {
        for twice in percent_forms(once) {
            push_distinct(&mut forms, raw, twice);
        }
    }
    for once in &entity {
        for twice in entity_forms(once) {
            push_distinct(&mut forms, raw, twice);
        }
        for twice in percent_forms(once) {
            push_distinct(&mut forms, raw, twice);
        }
    }
    forms.retain(|f| !percent.contains(f) && !entity.contains(f));
    forms
}

/// Identifies how `observed` encodes `raw`, if it is a recognized encoding.
pub fn detect_encoding(raw: &str, observed: &str) -> Option<EncodingKind> {
    if raw == observed {
        return None;
    }
    if entity_forms(raw).iter().any(|f| f == observed) {
        return Some(EncodingKind::Entity);
    }
    if percent_forms(raw).iter().any(|f| f == observed) {
        return Some(EncodingKind::Percent);
    }
    if double_forms(raw).iter().any(|f| f == observed) {
        return Some(EncodingKind::Double);
    }
    None
}

fn lower_hex_escapes(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '%' {
            for _ in 0..2 {
                if let Some(h) = chars.next() {
                    out.push(h.to_ascii_lowercase());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("<", "&lt;")]
    #[case("<", "&#60;")]
    #[case("<", "&#x3c;")]
    #[case("<", "&#x3C;")]
    #[case("\"", "&quot;")]
    #[case("'", "&#39;")]
    #[case("'", "&#039;")]
    #[case("'", "&#x27;")]
    #[case("'", "&apos;")]
    #[case("&lt;", "&amp;lt;")]
    fn test_entity_detection(#[case] raw: &str, #[case] observed: &str) {
        assert_eq!(detect_encoding(raw, observed), Some(EncodingKind::Entity));
    }

    #[rstest]
    #[case("<", "%3C")]
    #[case("<", "%3c")]
    #[case(" ", "%20")]
    #[case(" ", "+")]
    #[case("javascript:", "javascript%3A")]
    #[case("<!--", "%3C%21%2D%2D")]
    #[case("<!--", "%3C!--")]
    #[case("<!--", "%3c!--")]
    #[case("a b/c", "a%20b/c")]
    #[case("alert('1')", "alert%28%271%27%29")]
    fn test_percent_detection(#[case] raw: &str, #[case] observed: &str) {
        assert_eq!(detect_encoding(raw, observed), Some(EncodingKind::Percent));
    }

    #[rstest]
    #[case("<", "%253C")]
    #[case("<", "&amp;lt;")]
    #[case("<", "%26lt%3B")]
    fn test_double_detection(#[case] raw: &str, #[case] observed: &str) {
        assert_eq!(detect_encoding(raw, observed), Some(EncodingKind::Double));
    }

    #[test]
    fn test_unrelated_transformations_are_not_encodings() {
        assert_eq!(detect_encoding("<", "<"), None);
        assert_eq!(detect_encoding("<", "[removed]"), None);
        assert_eq!(detect_encoding("script", "SCRIPT"), None);
        assert_eq!(detect_encoding("<", ""), None);
    }

    #[test]
    fn test_partial_escaping_needs_a_known_character_set() {
        // `encodeURI` keeps `/`, but no set keeps `>` unescaped.
        assert_eq!(detect_encoding("</", "%3C/"), Some(EncodingKind::Percent));
        assert_eq!(detect_encoding("<a>", "%3Ca>"), None);
        assert_eq!(detect_encoding("a b", "a b"), None);
    }

    #[test]
    fn test_alphanumerics_have_no_encoded_forms() {
        assert!(entity_forms("onerror").is_empty());
        assert!(percent_forms("a").is_empty());
        assert!(double_forms("a").is_empty());
    }
}
