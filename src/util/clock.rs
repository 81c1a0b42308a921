use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TS: AtomicU64 = AtomicU64::new(0);

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Millisecond timestamp that is strictly increasing within this
/// process, even when the wall clock stalls or regresses. Under a dense
/// write burst the counter may run ahead of wall time; it re-syncs as
/// soon as wall time catches up.
pub fn monotonic_timestamp() -> u64 {
    let now = now_ms();
    let mut prev = LAST_TS.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_TS.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => prev = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing_in_a_burst() {
        let mut last = monotonic_timestamp();
        for _ in 0..10_000 {
            let ts = monotonic_timestamp();
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn tracks_wall_clock() {
        let ts = monotonic_timestamp();
        assert!(ts >= now_ms().saturating_sub(1_000));
    }
}
