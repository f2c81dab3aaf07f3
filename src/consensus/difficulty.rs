//! Difficulty adjustment algorithm
//!
//! Pure function over a window of (timestamp, cumulative difficulty)
//! samples. Outliers are cut from both ends of the sorted timestamps and
//! the remaining work is spread over the remaining time span.

/// Window shape of the retargeting function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyWindow {
    /// Number of samples considered
    pub window: usize,
    /// Samples dropped from each end after sorting
    pub cut: usize,
    /// Most recent samples ignored
    pub lag: usize,
    /// Target seconds per block
    pub target: u64,
}

impl DifficultyWindow {
    /// Samples the caller must supply: window plus lag
    pub fn blocks_count(&self) -> usize {
        self.window + self.lag
    }
}

/// Calculate the difficulty of the next block.
///
/// `timestamps` and `cumulative_difficulties` are parallel, oldest first.
/// Only the oldest `window` samples are used, which is how the lag takes
/// effect. Returns 0 when the result overflows 64 bits; callers treat
/// that as an unacceptable block.
pub fn next_difficulty(
    params: &DifficultyWindow,
    mut timestamps: Vec<u64>,
    mut cumulative_difficulties: Vec<u64>,
) -> u64 {
    timestamps.truncate(params.window);
    cumulative_difficulties.truncate(params.window);

    let length = timestamps.len().min(cumulative_difficulties.len());
    if length <= 1 {
        return 1;
    }

    timestamps.sort_unstable();

    let kept = params.window.saturating_sub(2 * params.cut).max(2);
    let (cut_begin, cut_end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept + 1) / 2;
        (begin, begin + kept)
    };

    let time_span = match timestamps[cut_end - 1] - timestamps[cut_begin] {
        0 => 1,
        span => span,
    };
    let total_work =
        cumulative_difficulties[cut_end - 1].wrapping_sub(cumulative_difficulties[cut_begin]);

    let product = total_work as u128 * params.target as u128;
    if product > u64::MAX as u128 {
        return 0;
    }
    let low = product as u64;
    match low.checked_add(time_span - 1) {
        Some(numerator) => numerator / time_span,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: DifficultyWindow = DifficultyWindow {
        window: 720,
        cut: 60,
        lag: 15,
        target: 120,
    };

    fn samples(count: usize, spacing: u64, difficulty: u64) -> (Vec<u64>, Vec<u64>) {
        let timestamps = (0..count as u64).map(|i| 1_000 + i * spacing).collect();
        let cumulative = (1..=count as u64).map(|i| i * difficulty).collect();
        (timestamps, cumulative)
    }

    #[test]
    fn test_short_history_is_one() {
        assert_eq!(next_difficulty(&PARAMS, vec![], vec![]), 1);
        assert_eq!(next_difficulty(&PARAMS, vec![5], vec![1]), 1);
    }

    #[test]
    fn test_on_target_keeps_difficulty() {
        let (t, c) = samples(100, 120, 1_000);
        assert_eq!(next_difficulty(&PARAMS, t, c), 1_000);

        let (t, c) = samples(10, 120, 1);
        assert_eq!(next_difficulty(&PARAMS, t, c), 1);
    }

    #[test]
    fn test_difficulty_increases_when_blocks_too_fast() {
        let (t, c) = samples(100, 60, 1_000);
        assert_eq!(next_difficulty(&PARAMS, t, c), 2_000);
    }

    #[test]
    fn test_difficulty_decreases_when_blocks_too_slow() {
        let (t, c) = samples(100, 240, 1_000);
        assert_eq!(next_difficulty(&PARAMS, t, c), 500);
    }

    #[test]
    fn test_zero_time_span_counts_as_one_second() {
        let t = vec![50; 5];
        let c = vec![10, 20, 30, 40, 50];
        assert_eq!(next_difficulty(&PARAMS, t, c), 40 * 120);
    }

    #[test]
    fn test_overflow_yields_zero() {
        let t = vec![0, 1];
        let c = vec![0, u64::MAX / 2];
        assert_eq!(next_difficulty(&PARAMS, t, c), 0);
    }

    #[test]
    fn test_cut_applies_to_full_window() {
        let (mut t, c) = samples(720, 120, 10);
        // Outliers at both ends fall inside the cut and do not matter
        t[0] = 0;
        t[719] = u64::MAX / 2;
        assert_eq!(next_difficulty(&PARAMS, t, c), 10);
    }

    #[test]
    fn test_blocks_count_includes_lag() {
        assert_eq!(PARAMS.blocks_count(), 735);
    }
}
