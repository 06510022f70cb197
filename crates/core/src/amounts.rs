//! Monetary amount extraction for Spanish-formatted text.
//!
//! `1.250.000,50 €` → `1250000.5`. Thousands use `.`, decimals use `,`.

use std::sync::LazyLock;

use regex::Regex;

static MONEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?)\s*(?:€|euros?\b|eur\b)")
        .expect("money regex is valid")
});

static MILLIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:,\d+)?)\s+millones?\s+de\s+euros").expect("millions regex is valid")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:,\d{1,2})?").expect("number regex is valid"));

/// Parse a single Spanish-formatted number. Surrounding text is ignored.
pub fn parse_amount(text: &str) -> Option<f64> {
    let m = NUMBER.find(text)?;
    m.as_str().replace('.', "").replace(',', ".").parse().ok()
}

/// Every money mention in the text, as written (deduplicated, in order).
pub fn extract_amount_mentions(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in MILLIONS.find_iter(text).chain(MONEY.find_iter(text)) {
        let s = m.as_str().trim().to_string();
        if !found.contains(&s) {
            found.push(s);
        }
    }
    found
}

/// Numeric values of every money mention.
pub fn extract_amounts(text: &str) -> Vec<f64> {
    let mut values = Vec::new();
    for caps in MILLIONS.captures_iter(text) {
        if let Some(v) = caps.get(1).and_then(|m| m.as_str().replace(',', ".").parse::<f64>().ok()) {
            values.push(v * 1_000_000.0);
        }
    }
    for caps in MONEY.captures_iter(text) {
        if let Some(v) = caps.get(1).and_then(|m| parse_amount(m.as_str())) {
            values.push(v);
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanish_thousands_and_decimals() {
        assert_eq!(parse_amount("1.250.000,50"), Some(1_250_000.5));
        assert_eq!(parse_amount("cuantía de 30.000 €"), Some(30_000.0));
        assert_eq!(parse_amount("sin importe"), None);
    }

    #[test]
    fn mentions_require_currency() {
        let text = "Dotación: 150.000 € para 12 entidades, hasta 5.000 euros por proyecto.";
        assert_eq!(extract_amount_mentions(text), vec!["150.000 €", "5.000 euros"]);
        assert_eq!(extract_amounts(text), vec![150_000.0, 5_000.0]);
    }

    #[test]
    fn millions_are_scaled() {
        assert_eq!(extract_amounts("un fondo de 2,5 millones de euros"), vec![2_500_000.0]);
    }
}
