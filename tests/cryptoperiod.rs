//! Property-based tests for cryptoperiod parsing and formatting.

use keyledger::cryptoperiod::{DAYS_IN_MONTH, DAYS_IN_YEAR, MAX_DAYS};
use keyledger::{Cryptoperiod, CryptoperiodError};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Formatting picks a unit that parses back to the same number of days.
    #[test]
    fn formatted_periods_parse_back(days in 1u32..=MAX_DAYS) {
        let period = Cryptoperiod::from_days(days).unwrap();
        let text = period.to_string();
        prop_assert_eq!(text.parse::<Cryptoperiod>(), Ok(period));
    }

    #[test]
    fn units_multiply_out(n in 1u32..=100, unit in prop_oneof![Just('d'), Just('m'), Just('y')]) {
        let days = match unit {
            'd' => n,
            'm' => n * DAYS_IN_MONTH,
            _ => n * DAYS_IN_YEAR,
        };
        let parsed = format!("{}{}", n, unit).parse::<Cryptoperiod>();
        prop_assert_eq!(parsed.map(|p| p.days()), Ok(days));
    }

    #[test]
    fn anything_past_the_ceiling_is_too_long(days in (MAX_DAYS + 1)..=u32::MAX) {
        prop_assert!(
            matches!(Cryptoperiod::from_days(days), Err(CryptoperiodError::TooLong { .. })),
            "expected TooLong for {} days", days
        );
    }

    /// Arbitrary text never panics the parser.
    #[test]
    fn parser_is_total(text in "\\PC{0,12}") {
        let _ = text.parse::<Cryptoperiod>();
    }
}
