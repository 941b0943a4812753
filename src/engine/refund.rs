use crate::model::*;
use crate::policy::RefundPolicy;

use super::pricing::div_round_half_up;

/// Refund entitlement for cancelling at `cancel_at` a booking that starts at
/// `start`. Thresholds are inclusive on the higher-refund side.
pub fn refund(total: Money, start: Ms, cancel_at: Ms, policy: &RefundPolicy) -> (u8, Money) {
    let lead = start.saturating_sub(cancel_at);
    let percent = if lead >= policy.full_lead {
        100
    } else if lead >= policy.partial_lead {
        policy.partial_percent.min(100)
    } else {
        0
    };
    let amount = div_round_half_up(i128::from(total.minor()) * i128::from(percent), 100);
    // |amount| <= |total| because percent <= 100
    (percent, Money::from_minor(amount as i64))
}
