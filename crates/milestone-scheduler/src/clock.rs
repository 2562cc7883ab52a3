//! Wall-clock abstraction and daily token-quota accounting.
//!
//! The reset boundary is always "next midnight in the configured IANA timezone", stored as a UTC
//! instant so the rest of the crate never has to reason about timezones again.

use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::QuotaError;

/// Abstracts wall-clock time so tests can inject a deterministic fake instead of sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A snapshot of the current budget, returned by `QuotaAccountant::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: i64,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of a `reserve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub granted: bool,
    pub reset_at: DateTime<Utc>,
}

struct QuotaState {
    used_tokens: i64,
    reset_at: DateTime<Utc>,
}

/// Process-local daily token budget, pinned to a fixed IANA timezone's midnight.
///
/// All operations are serialized under a single mutex; the critical section is pure arithmetic
/// with no `.await` inside it, so a blocking `std::sync::Mutex` is the right tool.
pub struct QuotaAccountant<C: Clock> {
    clock: C,
    daily_limit: i64,
    safety_margin: i64,
    timezone: Tz,
    state: Mutex<QuotaState>,
}

impl<C: Clock> QuotaAccountant<C> {
    pub fn new(clock: C, daily_limit: i64, safety_margin: i64, timezone: Tz) -> Self {
        let now = clock.now();
        let reset_at = next_midnight(now, timezone);
        Self {
            clock,
            daily_limit,
            safety_margin,
            timezone,
            state: Mutex::new(QuotaState { used_tokens: 0, reset_at }),
        }
    }

    fn roll_if_expired(&self, state: &mut QuotaState, now: DateTime<Utc>) {
        if now >= state.reset_at {
            state.used_tokens = 0;
            state.reset_at = next_midnight(now, self.timezone);
        }
    }

    /// Checks whether `cost` tokens can be reserved without mutating the counter.
    pub fn reserve(&self, cost: i64) -> Result<Reservation, QuotaError> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota mutex poisoned");
        self.roll_if_expired(&mut state, now);

        let budget = self.daily_limit - self.safety_margin;
        if state.used_tokens + cost > budget {
            return Err(QuotaError::Exceeded {
                used: state.used_tokens,
                requested: cost,
                limit: self.daily_limit,
                margin: self.safety_margin,
            });
        }
        Ok(Reservation { granted: true, reset_at: state.reset_at })
    }

    /// Records `cost` tokens as spent. Always paired with a prior successful `reserve`.
    pub fn consume(&self, cost: i64) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota mutex poisoned");
        self.roll_if_expired(&mut state, now);
        state.used_tokens += cost;
    }

    pub fn status(&self) -> QuotaStatus {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("quota mutex poisoned");
        self.roll_if_expired(&mut state, now);
        QuotaStatus {
            used: state.used_tokens,
            remaining: (self.daily_limit - self.safety_margin - state.used_tokens).max(0),
            reset_at: state.reset_at,
        }
    }
}

fn next_midnight(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let next_date = local.date_naive().succ_opt().unwrap_or(local.date_naive());
    let next_midnight_naive = next_date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    match tz.from_local_datetime(&next_midnight_naive).single() {
        Some(dt) => dt.with_timezone(&Utc),
        // DST fold/gap at local midnight: fall back to the earliest valid mapping.
        None => tz
            .from_local_datetime(&next_midnight_naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now + chrono::Duration::days(1)),
    }
}

/// Parses a configured IANA timezone name, warning once (not per-tick) and degrading to UTC if
/// the name is unrecognized.
pub fn resolve_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = name, "unknown IANA timezone, falling back to UTC for quota reset");
            chrono_tz::UTC
        }
    }
}
