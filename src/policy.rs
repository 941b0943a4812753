use crate::limits::*;
use crate::model::{HOUR_MS, MINUTE_MS, Ms};

/// Tunable booking rules. `Default` is the production policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub min_lead_time: Ms,
    pub min_duration: Ms,
    pub max_duration: Ms,
    pub payment_timeout: Ms,
    pub refund: RefundPolicy,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_lead_time: MIN_LEAD_TIME_MS,
            min_duration: MIN_DURATION_MS,
            max_duration: MAX_DURATION_MS,
            payment_timeout: PAYMENT_TIMEOUT_MS,
            refund: RefundPolicy::default(),
        }
    }
}

/// Thresholds are lead times before the booking start.
/// Invariant: `partial_lead <= full_lead`, `partial_percent <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    pub full_lead: Ms,
    pub partial_lead: Ms,
    pub partial_percent: u8,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_lead: FULL_REFUND_LEAD_MS,
            partial_lead: PARTIAL_REFUND_LEAD_MS,
            partial_percent: PARTIAL_REFUND_PERCENT,
        }
    }
}

impl BookingPolicy {
    /// Reject combinations that would make the window rules or refund table
    /// inconsistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_lead_time < 0 {
            return Err("min lead time must not be negative".into());
        }
        if self.min_duration <= 0 || self.min_duration > self.max_duration {
            return Err(format!(
                "duration bounds invalid: min {}ms, max {}ms",
                self.min_duration, self.max_duration
            ));
        }
        if self.payment_timeout <= 0 {
            return Err("payment timeout must be positive".into());
        }
        if self.refund.partial_lead > self.refund.full_lead {
            return Err("partial refund lead must not exceed full refund lead".into());
        }
        if self.refund.partial_percent > 100 {
            return Err("partial refund percent must be at most 100".into());
        }
        Ok(())
    }
}

/// Operator overrides in the units they are configured in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    pub min_lead_minutes: Option<i64>,
    pub min_duration_minutes: Option<i64>,
    pub max_duration_minutes: Option<i64>,
    pub payment_timeout_minutes: Option<i64>,
    pub full_refund_hours: Option<i64>,
    pub partial_refund_hours: Option<i64>,
    pub partial_refund_percent: Option<u8>,
}

fn scale(name: &str, value: Option<i64>, unit: Ms) -> Result<Option<Ms>, String> {
    value
        .map(|v| v.checked_mul(unit).ok_or_else(|| format!("{name} = {v} is out of range")))
        .transpose()
}

impl BookingPolicy {
    /// Apply `overrides` on top of `self` and validate the result.
    pub fn with_overrides(mut self, overrides: &PolicyOverrides) -> Result<Self, String> {
        let o = overrides;
        if let Some(v) = scale("min lead minutes", o.min_lead_minutes, MINUTE_MS)? {
            self.min_lead_time = v;
        }
        if let Some(v) = scale("min duration minutes", o.min_duration_minutes, MINUTE_MS)? {
            self.min_duration = v;
        }
        if let Some(v) = scale("max duration minutes", o.max_duration_minutes, MINUTE_MS)? {
            self.max_duration = v;
        }
        if let Some(v) = scale("payment timeout minutes", o.payment_timeout_minutes, MINUTE_MS)? {
            self.payment_timeout = v;
        }
        if let Some(v) = scale("full refund hours", o.full_refund_hours, HOUR_MS)? {
            self.refund.full_lead = v;
        }
        if let Some(v) = scale("partial refund hours", o.partial_refund_hours, HOUR_MS)? {
            self.refund.partial_lead = v;
        }
        if let Some(v) = o.partial_refund_percent {
            self.refund.partial_percent = v;
        }
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HOUR_MS;

    #[test]
    fn default_policy_is_valid() {
        let policy = BookingPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.min_lead_time, HOUR_MS);
        assert_eq!(policy.max_duration, 4 * HOUR_MS);
        assert_eq!(policy.refund.partial_percent, 50);
    }

    #[test]
    fn inverted_refund_thresholds_rejected() {
        let mut policy = BookingPolicy::default();
        policy.refund.partial_lead = 48 * HOUR_MS;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn inverted_duration_bounds_rejected() {
        let policy = BookingPolicy {
            min_duration: 5 * HOUR_MS,
            ..BookingPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn overrides_are_scaled() {
        let overrides = PolicyOverrides {
            min_lead_minutes: Some(30),
            full_refund_hours: Some(48),
            partial_refund_percent: Some(25),
            ..PolicyOverrides::default()
        };
        let policy = BookingPolicy::default().with_overrides(&overrides).unwrap();
        assert_eq!(policy.min_lead_time, 30 * MINUTE_MS);
        assert_eq!(policy.refund.full_lead, 48 * HOUR_MS);
        assert_eq!(policy.refund.partial_percent, 25);
        assert_eq!(policy.max_duration, 4 * HOUR_MS);
    }

    #[test]
    fn overflowing_override_is_a_config_error() {
        let overrides = PolicyOverrides {
            max_duration_minutes: Some(i64::MAX / 2),
            ..PolicyOverrides::default()
        };
        let err = BookingPolicy::default().with_overrides(&overrides).unwrap_err();
        assert!(err.contains("out of range"), "{err}");

        let hours = PolicyOverrides {
            full_refund_hours: Some(i64::MIN),
            ..PolicyOverrides::default()
        };
        assert!(BookingPolicy::default().with_overrides(&hours).is_err());
    }

    #[test]
    fn overrides_still_validated() {
        let overrides = PolicyOverrides {
            partial_refund_percent: Some(150),
            ..PolicyOverrides::default()
        };
        assert!(BookingPolicy::default().with_overrides(&overrides).is_err());
    }
}
