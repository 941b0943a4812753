use crate::model::*;

use super::EngineError;

/// Total price for booking `span` at `hourly_rate`, rounded half-up to the
/// minor unit once, after the full-precision product.
pub fn price(hourly_rate: Money, span: &Span) -> Result<Money, EngineError> {
    let exact = i128::from(hourly_rate.minor()) * i128::from(span.duration_ms());
    let minor = div_round_half_up(exact, i128::from(HOUR_MS));
    i64::try_from(minor)
        .map(Money::from_minor)
        .map_err(|_| EngineError::LimitExceeded("price overflows"))
}

/// `n / d` rounded to nearest, ties away from zero. `d > 0`.
pub(crate) fn div_round_half_up(n: i128, d: i128) -> i128 {
    if n < 0 {
        -div_round_half_up(-n, d)
    } else {
        (2 * n + d) / (2 * d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(minutes: Ms) -> Span {
        Span::new(0, minutes * MINUTE_MS)
    }

    #[test]
    fn whole_hours() {
        let total = price(Money::from_major(200_000), &span(120)).unwrap();
        assert_eq!(total, Money::from_major(400_000));
    }

    #[test]
    fn fractional_hours() {
        // 90 minutes at 10.00/h
        assert_eq!(price(Money::from_major(10), &span(90)).unwrap(), Money::from_minor(1500));
    }

    #[test]
    fn rounds_half_up_once() {
        // 0.01/h for 30 minutes is exactly half a minor unit
        assert_eq!(price(Money::from_minor(1), &span(30)).unwrap(), Money::from_minor(1));
        // 0.01/h for 29 minutes rounds down
        assert_eq!(price(Money::from_minor(1), &span(29)).unwrap(), Money::ZERO);
        // 1.00/h for 20 minutes = 33.33.. minor
        assert_eq!(price(Money::from_major(1), &span(20)).unwrap(), Money::from_minor(33));
        // 1.00/h for 40 minutes = 66.66.. minor
        assert_eq!(price(Money::from_major(1), &span(40)).unwrap(), Money::from_minor(67));
    }

    #[test]
    fn zero_rate_is_free() {
        assert_eq!(price(Money::ZERO, &span(60)).unwrap(), Money::ZERO);
    }

    #[test]
    fn overflow_reported() {
        let result = price(Money::from_minor(i64::MAX), &span(240));
        assert_eq!(result, Err(EngineError::LimitExceeded("price overflows")));
    }

    #[test]
    fn half_up_division() {
        assert_eq!(div_round_half_up(5, 10), 1);
        assert_eq!(div_round_half_up(4, 10), 0);
        assert_eq!(div_round_half_up(15, 10), 2);
        assert_eq!(div_round_half_up(-5, 10), -1);
        assert_eq!(div_round_half_up(0, 7), 0);
    }
}
