//! Currency amounts are stored as integer kurus (cents) so installment
//! arithmetic stays exact. The wire carries decimal currency numbers with
//! two fractional digits; conversion happens only at the boundary.

/// Parse a JSON currency number into cents. Rejects non-finite,
/// non-positive and absurdly large values.
pub fn cents_from_amount(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    // Half-up at the second decimal; amount is positive here.
    let cents = (amount * 100.0).round();
    if cents < 1.0 || cents > 1e15 {
        return None;
    }
    Some(cents as i64)
}

pub fn amount_from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// `total / n` in cents, rounded half-up. Used for the per-installment
/// base amount; the final installment absorbs the rounding remainder.
pub fn split_base(total_cents: i64, n: i64) -> i64 {
    (2 * total_cents + n) / (2 * n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_round_amounts() {
        assert_eq!(cents_from_amount(1000.0), Some(100_000));
        assert_eq!(cents_from_amount(1234.56), Some(123_456));
        assert_eq!(cents_from_amount(0.01), Some(1));
    }

    #[test]
    fn rejects_bad_amounts() {
        assert_eq!(cents_from_amount(0.0), None);
        assert_eq!(cents_from_amount(-5.0), None);
        assert_eq!(cents_from_amount(f64::NAN), None);
        assert_eq!(cents_from_amount(f64::INFINITY), None);
    }

    #[test]
    fn split_rounds_half_up() {
        // 1000.00 over 3: 333.33 base
        assert_eq!(split_base(100_000, 3), 33_333);
        // 100.00 over 8: 12.50 exactly
        assert_eq!(split_base(10_000, 8), 1_250);
        // 0.10 over 3: 0.033... -> 0.03
        assert_eq!(split_base(10, 3), 3);
        // half boundary rounds up: 0.05 over 2 -> 0.03
        assert_eq!(split_base(5, 2), 3);
    }

    #[test]
    fn cents_round_trip_on_wire() {
        for cents in [1i64, 99, 100, 33_334, 100_000, 999_999_99] {
            assert_eq!(cents_from_amount(amount_from_cents(cents)), Some(cents));
        }
    }
}
