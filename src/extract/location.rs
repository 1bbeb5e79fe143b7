//! Heuristic parsing of free-text supplier locations.
//!
//! Cards show locations as loosely formatted strings like
//! `"China, Zhejiang, Hangzhou"` or `"CN Guangdong Shenzhen Baoan"`. The
//! first token is taken as the country and mapped to a canonical name when it
//! matches a known variant; following tokens map positionally to province,
//! city and district. Irregular formats produce best-effort output, not an
//! error.

use crate::records::Location;

/// Known country-name variants, lowercased, mapped to canonical names.
/// Covers the spellings actually observed on supplier cards.
const COUNTRY_VARIANTS: &[(&str, &str)] = &[
    ("cn", "China"),
    ("china", "China"),
    ("mainland china", "China"),
    ("china (mainland)", "China"),
    ("prc", "China"),
    ("hk", "Hong Kong"),
    ("hong kong", "Hong Kong"),
    ("hong kong s.a.r.", "Hong Kong"),
    ("tw", "Taiwan"),
    ("taiwan", "Taiwan"),
    ("us", "United States"),
    ("usa", "United States"),
    ("united states", "United States"),
    ("uk", "United Kingdom"),
    ("united kingdom", "United Kingdom"),
    ("vn", "Vietnam"),
    ("vietnam", "Vietnam"),
    ("in", "India"),
    ("india", "India"),
];

/// Parses a free-text location string into structured fields.
pub fn parse(raw: &str) -> Location {
    let tokens = tokenize(raw);
    let mut location = Location::default();

    let mut parts = tokens.into_iter();
    if let Some(first) = parts.next() {
        location.country = canonical_country(&first);
    }
    if let Some(province) = parts.next() {
        location.province = province;
    }
    if let Some(city) = parts.next() {
        location.city = city;
    }
    if let Some(district) = parts.next() {
        location.district = district;
    }

    location
}

/// Splits on commas when present, otherwise on whitespace.
fn tokenize(raw: &str) -> Vec<String> {
    let by_comma: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if by_comma.len() > 1 {
        return by_comma;
    }
    raw.split_whitespace().map(|t| t.to_string()).collect()
}

fn canonical_country(token: &str) -> String {
    let lowered = token.trim().to_lowercase();
    for (variant, canonical) in COUNTRY_VARIANTS {
        if lowered == *variant {
            return canonical.to_string();
        }
    }
    token.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_separated() {
        let loc = parse("China, Zhejiang, Hangzhou, Xihu");
        assert_eq!(loc.country, "China");
        assert_eq!(loc.province, "Zhejiang");
        assert_eq!(loc.city, "Hangzhou");
        assert_eq!(loc.district, "Xihu");
    }

    #[test]
    fn test_whitespace_separated() {
        let loc = parse("CN Guangdong Shenzhen");
        assert_eq!(loc.country, "China");
        assert_eq!(loc.province, "Guangdong");
        assert_eq!(loc.city, "Shenzhen");
        assert_eq!(loc.district, "");
    }

    #[test]
    fn test_country_variants() {
        assert_eq!(parse("USA, California").country, "United States");
        assert_eq!(parse("hong kong").country, "Hong Kong");
        // Unknown countries pass through as-is
        assert_eq!(parse("Atlantis, Somewhere").country, "Atlantis");
    }

    #[test]
    fn test_country_only() {
        let loc = parse("China");
        assert_eq!(loc.country, "China");
        assert_eq!(loc.province, "");
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(parse(""), Location::default());
        assert_eq!(parse("   "), Location::default());
    }

    #[test]
    fn test_multiword_tokens_survive_comma_split() {
        let loc = parse("United States, New York, New York City");
        assert_eq!(loc.country, "United States");
        assert_eq!(loc.province, "New York");
        assert_eq!(loc.city, "New York City");
    }
}
