use crate::limits::*;
use crate::model::*;
use crate::policy::BookingPolicy;

use super::EngineError;

/// Why a requested time window was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRejection {
    TooSoon,
    EndBeforeStart,
    TooShort,
    TooLong,
    OutsideOperatingHours,
}

impl std::fmt::Display for WindowRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            WindowRejection::TooSoon => "start is earlier than the minimum lead time",
            WindowRejection::EndBeforeStart => "end must be after start",
            WindowRejection::TooShort => "shorter than the minimum duration",
            WindowRejection::TooLong => "longer than the maximum duration",
            WindowRejection::OutsideOperatingHours => "outside the venue's opening hours",
        };
        f.write_str(msg)
    }
}

/// Check a requested window against the booking policy. The first failing
/// rule is reported.
pub fn validate_window(start: Ms, end: Ms, now: Ms, policy: &BookingPolicy) -> Result<(), WindowRejection> {
    if start < now.saturating_add(policy.min_lead_time) {
        return Err(WindowRejection::TooSoon);
    }
    if end <= start {
        return Err(WindowRejection::EndBeforeStart);
    }
    let duration = end - start;
    if duration < policy.min_duration {
        return Err(WindowRejection::TooShort);
    }
    if duration > policy.max_duration {
        return Err(WindowRejection::TooLong);
    }
    Ok(())
}

/// A window must fit inside the opening hours of the UTC day it starts on.
/// Venues without opening hours accept any window.
pub fn validate_operating_hours(venue: &Venue, span: &Span) -> Result<(), WindowRejection> {
    match venue.hours {
        Some(hours) if !hours.window_on_day_of(span.start).contains_span(span) => {
            Err(WindowRejection::OutsideOperatingHours)
        }
        _ => Ok(()),
    }
}

pub fn validate_timestamps(start: Ms, end: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&start)
        || !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&end)
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const NOW: Ms = 1_700_000_000_000;

    fn policy() -> BookingPolicy {
        BookingPolicy::default()
    }

    #[test]
    fn accepts_valid_window() {
        let start = NOW + 2 * HOUR_MS;
        assert_eq!(validate_window(start, start + 2 * HOUR_MS, NOW, &policy()), Ok(()));
    }

    #[test]
    fn lead_time_boundary_is_inclusive() {
        let start = NOW + HOUR_MS;
        assert_eq!(validate_window(start, start + HOUR_MS, NOW, &policy()), Ok(()));
        assert_eq!(
            validate_window(start - 1, start + HOUR_MS, NOW, &policy()),
            Err(WindowRejection::TooSoon)
        );
    }

    #[test]
    fn too_soon_reported_before_shape_errors() {
        // Both too soon and reversed: the first rule wins
        assert_eq!(validate_window(NOW, NOW - HOUR_MS, NOW, &policy()), Err(WindowRejection::TooSoon));
    }

    #[test]
    fn end_before_or_equal_start() {
        let start = NOW + 2 * HOUR_MS;
        assert_eq!(
            validate_window(start, start, NOW, &policy()),
            Err(WindowRejection::EndBeforeStart)
        );
        assert_eq!(
            validate_window(start, start - 1, NOW, &policy()),
            Err(WindowRejection::EndBeforeStart)
        );
    }

    #[test]
    fn duration_bounds_inclusive() {
        let start = NOW + 2 * HOUR_MS;
        assert_eq!(validate_window(start, start + HOUR_MS - 1, NOW, &policy()), Err(WindowRejection::TooShort));
        assert_eq!(validate_window(start, start + 4 * HOUR_MS, NOW, &policy()), Ok(()));
        assert_eq!(validate_window(start, start + 4 * HOUR_MS + 1, NOW, &policy()), Err(WindowRejection::TooLong));
    }

    #[test]
    fn operating_hours() {
        let day = 1_700_006_400_000 - 1_700_006_400_000 % DAY_MS;
        let mut venue = Venue {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            hourly_rate: Money::from_major(1),
            hours: OpeningHours::new(8 * 60, 22 * 60),
            active: true,
        };

        let inside = Span::new(day + 8 * HOUR_MS, day + 10 * HOUR_MS);
        let closing = Span::new(day + 20 * HOUR_MS, day + 22 * HOUR_MS);
        let early = Span::new(day + 7 * HOUR_MS, day + 9 * HOUR_MS);
        let late = Span::new(day + 21 * HOUR_MS, day + 23 * HOUR_MS);
        assert_eq!(validate_operating_hours(&venue, &inside), Ok(()));
        assert_eq!(validate_operating_hours(&venue, &closing), Ok(()));
        assert_eq!(validate_operating_hours(&venue, &early), Err(WindowRejection::OutsideOperatingHours));
        assert_eq!(validate_operating_hours(&venue, &late), Err(WindowRejection::OutsideOperatingHours));

        venue.hours = None;
        assert_eq!(validate_operating_hours(&venue, &late), Ok(()));
    }

    #[test]
    fn timestamps_out_of_range() {
        assert!(validate_timestamps(NOW, NOW + HOUR_MS).is_ok());
        assert_eq!(
            validate_timestamps(0, HOUR_MS),
            Err(EngineError::LimitExceeded("timestamp out of range"))
        );
        assert!(validate_timestamps(NOW, MAX_VALID_TIMESTAMP_MS + 1).is_err());
    }
}
