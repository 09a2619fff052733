//! Rate-of-fire hysteresis selection.

use crate::audio::Sound;

/// One entry in the rate-of-fire table.
pub struct RateEntry {
    pub rpm: u16,
    pub threshold_us: u32,
    pub sound: Option<Sound>,
    pub volume: f32,
}

/// Sentinel for "no rate selected".
pub const IDLE: i32 = -1;

/// Selects a rate index from `rates` given the current PWM average `p`,
/// the previously selected index `prev` (or [`IDLE`]), and hysteresis
/// `h`. Full scan, no early exit (per the open-question resolution: the
/// reference's ascending-threshold early-exit assumption does not hold
/// in general).
///
/// `effective_threshold_i = threshold_i - h` when `i == prev`, else
/// `threshold_i + h`. The selected rate is the one with the highest raw
/// `threshold_i` among candidates satisfying `p >= effective_threshold_i`;
/// if none qualify, [`IDLE`].
pub fn select_rate(rates: &[RateEntry], prev: i32, p: u32, h: u32) -> i32 {
    let mut best: Option<(i32, u32)> = None;
    for (i, rate) in rates.iter().enumerate() {
        let i = i as i32;
        let effective = if i == prev {
            rate.threshold_us.saturating_sub(h)
        } else {
            rate.threshold_us + h
        };
        if p >= effective {
            match best {
                Some((_, best_thr)) if rate.threshold_us <= best_thr => {}
                _ => best = Some((i, rate.threshold_us)),
            }
        }
    }
    best.map(|(i, _)| i).unwrap_or(IDLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<RateEntry> {
        vec![
            RateEntry { rpm: 600, threshold_us: 1200, sound: None, volume: 1.0 },
            RateEntry { rpm: 900, threshold_us: 1500, sound: None, volume: 1.0 },
            RateEntry { rpm: 1200, threshold_us: 1800, sound: None, volume: 1.0 },
        ]
    }

    #[test]
    fn reference_hysteresis_sequence_matches_expected_indices() {
        let rates = table();
        let h = 50;
        let sequence = [1100, 1240, 1260, 1449, 1451, 1549, 1551, 1750, 1000];
        let expected = [-1, -1, 0, 0, 0, 0, 1, 1, -1];
        let mut prev = IDLE;
        let mut got = Vec::new();
        for &p in &sequence {
            prev = select_rate(&rates, prev, p, h);
            got.push(prev);
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn empty_table_is_always_idle() {
        assert_eq!(select_rate(&[], IDLE, 5000, 50), IDLE);
    }
}
