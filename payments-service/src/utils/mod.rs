//! Money helpers shared across the service.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to cents, half-up away from zero.
///
/// Every VAT and installment figure in the system goes through this
/// exact policy; financial-report parity depends on it.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rounds_half_up_at_the_cent() {
        assert_eq!(
            round2(Decimal::from_str("1.005").unwrap()),
            Decimal::from_str("1.01").unwrap()
        );
        assert_eq!(
            round2(Decimal::from_str("1.004").unwrap()),
            Decimal::from_str("1.00").unwrap()
        );
        assert_eq!(
            round2(Decimal::from_str("17.0").unwrap()),
            Decimal::from_str("17.0").unwrap()
        );
    }
}
