//! Card-brand detection shared by every gateway adapter.
//!
//! A single implementation keeps the brand reported on payments and
//! invoices identical no matter which processor handled the charge.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardBrand {
    Visa,
    Mastercard,
    AmericanExpress,
    Diners,
    Discover,
    Jcb,
    UnionPay,
    Unknown,
}

impl CardBrand {
    /// Detect the brand from the leading digits of a card number.
    /// Spaces and dashes are ignored.
    pub fn detect(number: &str) -> Self {
        let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();

        if digits.starts_with("34") || digits.starts_with("37") {
            CardBrand::AmericanExpress
        } else if digits.starts_with("35") {
            CardBrand::Jcb
        } else if digits.starts_with("36") || digits.starts_with("38") || digits.starts_with("39") {
            CardBrand::Diners
        } else if digits.starts_with('4') {
            CardBrand::Visa
        } else if matches!(digits.get(..2), Some("51" | "52" | "53" | "54" | "55")) {
            CardBrand::Mastercard
        } else if digits.starts_with("6011") {
            CardBrand::Discover
        } else if digits.starts_with("62") {
            CardBrand::UnionPay
        } else {
            CardBrand::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardBrand::Visa => "Visa",
            CardBrand::Mastercard => "Mastercard",
            CardBrand::AmericanExpress => "American Express",
            CardBrand::Diners => "Diners Club",
            CardBrand::Discover => "Discover",
            CardBrand::Jcb => "JCB",
            CardBrand::UnionPay => "UnionPay",
            CardBrand::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_brands() {
        assert_eq!(CardBrand::detect("4111111111111111"), CardBrand::Visa);
        assert_eq!(CardBrand::detect("4580458045804580"), CardBrand::Visa);
        assert_eq!(CardBrand::detect("5500000000000000"), CardBrand::Mastercard);
        assert_eq!(
            CardBrand::detect("341111111111111"),
            CardBrand::AmericanExpress
        );
        assert_eq!(CardBrand::detect("371111111111111"), CardBrand::AmericanExpress);
        assert_eq!(CardBrand::detect("36111111111111"), CardBrand::Diners);
        assert_eq!(CardBrand::detect("6011000000000000"), CardBrand::Discover);
        assert_eq!(CardBrand::detect("3528000000000000"), CardBrand::Jcb);
        assert_eq!(CardBrand::detect("6212345678901234"), CardBrand::UnionPay);
    }

    #[test]
    fn unknown_prefix_is_unknown() {
        assert_eq!(CardBrand::detect("9999999999999999"), CardBrand::Unknown);
        assert_eq!(CardBrand::detect(""), CardBrand::Unknown);
    }

    #[test]
    fn separators_are_ignored() {
        assert_eq!(CardBrand::detect("4111-1111-1111-1111"), CardBrand::Visa);
        assert_eq!(CardBrand::detect("5500 0000 0000 0000"), CardBrand::Mastercard);
    }

    #[test]
    fn display_matches_reporting_names() {
        assert_eq!(CardBrand::Visa.to_string(), "Visa");
        assert_eq!(CardBrand::AmericanExpress.to_string(), "American Express");
        assert_eq!(CardBrand::Unknown.to_string(), "Unknown");
    }
}
