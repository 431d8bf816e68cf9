//! Quantity parsing for scheduler resource strings.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Binary multiplier suffixes, in order. `K` is 1024^1, `M` is 1024^2, ...
const SUFFIXES: &str = "KMGTP";

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]+(?:\.[0-9]*)?)([A-Za-z]*)$").expect("quantity regex is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("Can't parse quantity {0:?}")]
    Malformed(String),
    #[error("Can't handle multiplier {suffix:?} for value {value:?}")]
    UnknownSuffix { suffix: String, value: String },
}

/// Parse a quantity such as `64`, `256G` or `1.5T` into an absolute count.
///
/// Suffixes are binary: `K` = 1024, `M` = 1024^2, and so on. Fractional values
/// are truncated after scaling.
pub fn parse_quantity(s: &str) -> Result<u64, QuantityError> {
    let s = s.trim();
    let caps = QUANTITY_RE
        .captures(s)
        .ok_or_else(|| QuantityError::Malformed(s.to_string()))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|_| QuantityError::Malformed(s.to_string()))?;

    let suffix = &caps[2];
    let multiplier = if suffix.is_empty() {
        1.0
    } else {
        let upper = suffix.to_ascii_uppercase();
        let position = (upper.len() == 1)
            .then(|| SUFFIXES.find(upper.as_str()))
            .flatten()
            .ok_or_else(|| QuantityError::UnknownSuffix {
                suffix: suffix.to_string(),
                value: s.to_string(),
            })?;
        1024f64.powi(position as i32 + 1)
    };

    Ok((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_counts() {
        assert_eq!(parse_quantity("64"), Ok(64));
        assert_eq!(parse_quantity(" 4 "), Ok(4));
        assert_eq!(parse_quantity("0"), Ok(0));
    }

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(parse_quantity("1K"), Ok(1024));
        assert_eq!(parse_quantity("2M"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_quantity("256G"), Ok(256 * 1024 * 1024 * 1024));
        assert_eq!(parse_quantity("1T"), Ok(1024u64.pow(4)));
        assert_eq!(parse_quantity("4g"), Ok(4 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_fractional_values() {
        assert_eq!(parse_quantity("1.5K"), Ok(1536));
        assert_eq!(parse_quantity("0.5G"), Ok(512 * 1024 * 1024));
    }

    #[test]
    fn test_bad_suffix() {
        assert!(matches!(
            parse_quantity("12X"),
            Err(QuantityError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            parse_quantity("12GB"),
            Err(QuantityError::UnknownSuffix { .. })
        ));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse_quantity(""), Err(QuantityError::Malformed(_))));
        assert!(matches!(parse_quantity("G"), Err(QuantityError::Malformed(_))));
        assert!(matches!(
            parse_quantity("-1"),
            Err(QuantityError::Malformed(_))
        ));
    }
}
