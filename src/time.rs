//! Slot calculus: the pure mapping between block times and slot numbers.
//!
//! Kept free of any controller state beyond the two inputs the formulas
//! actually need (`block_interval` and `head_block_time`), matching the
//! "pure, stateless" framing of the design: everything here is a plain
//! function over `u64` unix-second timestamps, so it is trivially unit
//! tested without constructing a controller.

/// Unix-second timestamp. A fixed-width alias rather than a newtype because
/// the arithmetic below is ordinary integer math and a newtype would only
/// add friction at call sites.
pub type Timestamp = u64;

/// `get_slot_time(0)` never participates in scheduling; by convention it
/// resolves to this sentinel, matching the "epoch zero" framing in the
/// design rather than panicking on a degenerate slot number.
pub const EPOCH_ZERO_SENTINEL: Timestamp = 0;

/// The time of slot `n` relative to `head_block_time`, or
/// [`EPOCH_ZERO_SENTINEL`] for `n == 0`.
///
/// `head_block_time` is first rounded down to a slot boundary so fractional
/// drift never accumulates across calls.
pub fn get_slot_time(block_interval_secs: u64, head_block_time: Timestamp, n: u64) -> Timestamp {
    if n == 0 {
        return EPOCH_ZERO_SENTINEL;
    }
    let aligned_head = (head_block_time / block_interval_secs) * block_interval_secs;
    aligned_head + n * block_interval_secs
}

/// The largest `n` such that `get_slot_time(n) <= t`, or `0` if `t` is
/// before the first slot after `head_block_time`.
pub fn get_slot_at_time(block_interval_secs: u64, head_block_time: Timestamp, t: Timestamp) -> u64 {
    let aligned_head = (head_block_time / block_interval_secs) * block_interval_secs;
    if t < aligned_head + block_interval_secs {
        return 0;
    }
    (t - aligned_head) / block_interval_secs
}

/// Whether `t` falls exactly on a slot boundary relative to `head_block_time`.
pub fn is_slot_aligned(block_interval_secs: u64, head_block_time: Timestamp, t: Timestamp) -> bool {
    let n = get_slot_at_time(block_interval_secs, head_block_time, t);
    n > 0 && get_slot_time(block_interval_secs, head_block_time, n) == t
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: u64 = 3;

    #[test]
    fn slot_zero_is_sentinel() {
        assert_eq!(get_slot_time(INTERVAL, 1_000, 0), EPOCH_ZERO_SENTINEL);
    }

    #[test]
    fn slot_round_trip_holds_for_positive_slots() {
        // P5: for all N>0, get_slot_at_time(get_slot_time(N)) == N.
        for head in [0u64, 3, 100, 999] {
            for n in 1..200u64 {
                let t = get_slot_time(INTERVAL, head, n);
                assert_eq!(get_slot_at_time(INTERVAL, head, t), n, "head={head} n={n}");
            }
        }
    }

    #[test]
    fn time_before_first_slot_maps_to_zero() {
        assert_eq!(get_slot_at_time(INTERVAL, 9, 9), 0);
        assert_eq!(get_slot_at_time(INTERVAL, 9, 11), 0);
    }

    #[test]
    fn misaligned_timestamp_is_not_slot_aligned() {
        assert!(!is_slot_aligned(INTERVAL, 0, 4));
        assert!(is_slot_aligned(INTERVAL, 0, 3));
    }

    #[test]
    fn head_time_is_rounded_down_to_slot_boundary() {
        // head_block_time=5 with interval 3 aligns down to 3.
        assert_eq!(get_slot_time(INTERVAL, 5, 1), 6);
    }
}
