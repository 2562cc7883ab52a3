//! Property-based checks for the clock and quota accountant.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use milestone_scheduler::{Clock, QuotaAccountant};
use proptest::prelude::*;

struct FakeClock(AtomicI64);

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.0.load(Ordering::SeqCst), 0).unwrap()
    }
}

proptest! {
    /// Quota safety: across any sequence of reserve/consume pairs, used_tokens never exceeds
    /// daily_limit, and a reserve beyond (limit - margin) is always refused.
    #[test]
    fn p4_quota_never_exceeds_limit(
        limit in 10i64..10_000,
        margin in 0i64..10,
        costs in prop::collection::vec(1i64..50, 0..30),
    ) {
        let margin = margin.min(limit - 1);
        let clock = FakeClock(AtomicI64::new(1_700_000_000));
        let accountant = QuotaAccountant::new(clock, limit, margin, chrono_tz::UTC);

        for cost in costs {
            if accountant.reserve(cost).is_ok() {
                accountant.consume(cost);
            }
            let status = accountant.status();
            prop_assert!(status.used <= limit);
            prop_assert!(status.used <= limit - margin);
        }
    }
}
