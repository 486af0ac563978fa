//! Effective-priority score packing for the pending index.
//!
//! The pending index is a sorted set read with `ZREVRANGE`, so the score
//! must order jobs highest-priority-first and, within a priority,
//! oldest-first (FIFO). Both dimensions are packed into one integer that a
//! Redis score (an f64) represents exactly:
//!
//! ```text
//! score = priority << 41 | (TIME_SPAN - 1 - (t - TIME_EPOCH))
//! ```
//!
//! Priority occupies the bits above the time field, so it always dominates;
//! the time field stores an *inverted* offset so earlier timestamps yield
//! larger scores. 41 bits of milliseconds give the time field ~69 years of
//! range past the 2020 epoch, and 12 bits of priority keep the whole value
//! under 2^53, the largest integer an f64 holds exactly.

/// Custom epoch for the packed time field: 2020-01-01T00:00:00Z.
pub const TIME_EPOCH_MS: i64 = 1_577_836_800_000;

/// Width of the time field in bits.
const TIME_BITS: u32 = 41;

/// Exclusive upper bound of the time field.
pub const TIME_SPAN: i64 = 1 << TIME_BITS;

/// Highest priority the score can represent; larger values clamp.
pub const MAX_PRIORITY: i64 = (1 << 12) - 1;

/// Pack (priority, timestamp) into a pending-index score.
///
/// `timestamp_ms` is the job's sort datetime (the workflow's submission
/// time when the job belongs to one). Out-of-range inputs clamp rather
/// than wrap so ordering degrades gracefully.
pub fn encode_score(priority: i64, timestamp_ms: i64) -> f64 {
    let priority = priority.clamp(0, MAX_PRIORITY);
    let rel = (timestamp_ms - TIME_EPOCH_MS).clamp(0, TIME_SPAN - 1);
    let inverted = TIME_SPAN - 1 - rel;
    ((priority << TIME_BITS) | inverted) as f64
}

/// Unpack a score back into (priority, timestamp_ms). Used by monitors and
/// tests; the data plane itself never needs to invert the encoding.
pub fn decode_score(score: f64) -> (i64, i64) {
    let packed = score as i64;
    let priority = packed >> TIME_BITS;
    let inverted = packed & (TIME_SPAN - 1);
    let timestamp_ms = TIME_EPOCH_MS + (TIME_SPAN - 1 - inverted);
    (priority, timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_higher_priority_sorts_first() {
        let hi = encode_score(200, T0 + 1_000);
        let lo = encode_score(50, T0);
        // Newer but higher-priority job must outrank the older low one.
        assert!(hi > lo);
    }

    #[test]
    fn test_fifo_within_priority() {
        let older = encode_score(100, T0);
        let newer = encode_score(100, T0 + 1_000);
        assert!(older > newer);
    }

    #[test]
    fn test_one_millisecond_resolution() {
        let a = encode_score(100, T0);
        let b = encode_score(100, T0 + 1);
        assert!(a > b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_encoding_is_exact_in_f64() {
        // The packed value must survive the f64 round-trip bit-for-bit;
        // otherwise ZADD would silently reorder near-ties.
        let score = encode_score(MAX_PRIORITY, T0);
        assert_eq!(score, (score as i64) as f64);
        assert!((score as i64) < (1_i64 << 53));
    }

    #[test]
    fn test_decode_roundtrip() {
        let (priority, ts) = decode_score(encode_score(750, T0));
        assert_eq!(priority, 750);
        assert_eq!(ts, T0);
    }

    #[test]
    fn test_priority_clamps() {
        let over = encode_score(1_000_000, T0);
        let max = encode_score(MAX_PRIORITY, T0);
        assert_eq!(over, max);

        let negative = encode_score(-5, T0);
        let zero = encode_score(0, T0);
        assert_eq!(negative, zero);
    }

    #[test]
    fn test_priority_dominates_any_time_gap() {
        // Even the oldest possible low-priority job never outranks a
        // brand-new higher-priority one.
        let oldest_low = encode_score(99, TIME_EPOCH_MS);
        let newest_high = encode_score(100, TIME_EPOCH_MS + TIME_SPAN - 1);
        assert!(newest_high > oldest_low);
    }

    #[test]
    fn test_workflow_inheritance_ordering() {
        // Two workflows, equal priority, one second apart. Every step of
        // the older workflow must outrank every step of the newer one,
        // regardless of per-step submission times.
        let w_old = T0;
        let w_new = T0 + 1_000;
        let old_step = encode_score(100, w_old);
        let new_step = encode_score(100, w_new);
        assert!(old_step > new_step);
    }
}
