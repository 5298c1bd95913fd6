//! Pure scheduling arithmetic for key generation, coverage, and rotation.
//! Kept free of I/O so the coverage/rotation scenarios in SPEC_FULL.md 8 can
//! be tested directly against the numbers in the spec.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// Round a timestamp down to the previous UTC midnight.
pub fn previous_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0).unwrap()
}

/// One slot to be generated: `[valid_after, valid_until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    pub valid_after: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

/// Plan the slots `createKeysAsNeeded` would generate: enough contiguous
/// `lifetime`-second slots to cover `now .. now + prepublication_interval`,
/// continuing on from `last_expiry` if any KeySets already exist.
pub fn plan_new_slots(
    now: DateTime<Utc>,
    last_expiry: Option<DateTime<Utc>>,
    lifetime_secs: i64,
    prepublication_interval_secs: i64,
) -> Vec<SlotPlan> {
    let effective_last_expiry = last_expiry.unwrap_or(now);
    let time_to_cover = (effective_last_expiry + chrono::Duration::seconds(prepublication_interval_secs) - now)
        .num_seconds();
    if time_to_cover <= 0 {
        return Vec::new();
    }

    let n_keys = time_to_cover.div_ceil(lifetime_secs).max(0) as usize;

    let mut start_at = match last_expiry {
        Some(expiry) => expiry + chrono::Duration::seconds(60),
        None => now + chrono::Duration::seconds(60),
    };
    start_at = previous_midnight(start_at);

    let mut plans = Vec::with_capacity(n_keys);
    for _ in 0..n_keys {
        let next_start = start_at + chrono::Duration::seconds(lifetime_secs);
        plans.push(SlotPlan { valid_after: start_at, valid_until: next_start });
        start_at = next_start;
    }
    plans
}

/// `getNextKeygen`: `lastKeyEnd - PUBLICATION_LATENCY`, or "now" (`None`) if
/// no KeySets exist yet.
pub fn next_keygen_time(
    last_expiry: Option<DateTime<Utc>>,
    publication_latency_secs: i64,
) -> Option<DateTime<Utc>> {
    last_expiry.map(|expiry| expiry - chrono::Duration::seconds(publication_latency_secs))
}

/// A KeySet is live at `now` if `valid_after < now` and
/// `valid_until > now - overlap`.
pub fn is_live(valid_after: DateTime<Utc>, valid_until: DateTime<Utc>, now: DateTime<Utc>, overlap_secs: i64) -> bool {
    let cutoff = now - chrono::Duration::seconds(overlap_secs);
    valid_after < now && valid_until > cutoff
}

/// A KeySet is dead (eligible for removal) once `valid_until + overlap` has
/// passed.
pub fn is_dead(valid_until: DateTime<Utc>, now: DateTime<Utc>, overlap_secs: i64) -> bool {
    valid_until + chrono::Duration::seconds(overlap_secs) < now
}

/// The next time `updateKeys` must run again: the earliest add-event
/// (`Valid-Until`, bringing the successor in) or remove-event
/// (`Valid-Until + overlap`, retiring it) across the live set.
pub fn next_update_time(
    live: &[(DateTime<Utc>, DateTime<Utc>)],
    overlap_secs: i64,
) -> Option<DateTime<Utc>> {
    live.iter()
        .flat_map(|&(_, valid_until)| {
            [valid_until, valid_until + chrono::Duration::seconds(overlap_secs)]
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn key_rotation_coverage_scenario() {
        let now = dt("2024-01-01T12:00:00Z");
        let lifetime = 7 * 24 * 3600;
        let prepub = 14 * 24 * 3600;

        let plans = plan_new_slots(now, None, lifetime, prepub);
        assert_eq!(plans.len(), 2, "ceil(14d / 7d) == 2 KeySets");

        let last = plans.last().unwrap();
        let at_t_plus_30d = now + chrono::Duration::days(30);
        assert!(is_dead(last.valid_until, at_t_plus_30d, 0));
    }

    #[test]
    fn next_keygen_is_now_when_empty() {
        assert_eq!(next_keygen_time(None, 3 * 24 * 3600), None);
    }

    #[test]
    fn next_update_time_is_earliest_add_or_remove_event() {
        let live = vec![(dt("2024-01-01T00:00:00Z"), dt("2024-01-08T00:00:00Z"))];
        let next = next_update_time(&live, 86400).unwrap();
        assert_eq!(next, dt("2024-01-08T00:00:00Z"));
    }

    #[test]
    fn slots_start_at_midnight() {
        let now = dt("2024-01-01T12:34:56Z");
        let plans = plan_new_slots(now, None, 7 * 24 * 3600, 14 * 24 * 3600);
        assert_eq!(plans[0].valid_after.hour(), 0);
        assert_eq!(plans[0].valid_after.minute(), 0);
    }
}
