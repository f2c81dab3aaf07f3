//! Block reward calculation
//!
//! Emission follows a smooth curve: each block releases a fixed fraction
//! of the coins not yet generated. Blocks larger than the recent median
//! pay a quadratic penalty, and blocks over twice the median are invalid.

/// Reward of a block and its effect on the generated supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReward {
    /// Amount the coinbase must pay out
    pub reward: u64,
    /// Change to the already-generated coins counter
    pub emission_change: i64,
}

/// Apply the block size penalty to `amount`.
///
/// No penalty at or below the median; at twice the median the whole
/// amount is lost.
pub fn get_penalized_amount(amount: u64, median_size: u64, current_block_size: u64) -> u64 {
    if amount == 0 {
        return 0;
    }
    if current_block_size <= median_size {
        return amount;
    }
    if current_block_size >= 2 * median_size {
        return 0;
    }

    let multiplicand = (2 * median_size as u128 - current_block_size as u128) * current_block_size as u128;
    let product = amount as u128 * multiplicand;
    (product / median_size as u128 / median_size as u128) as u64
}

/// Base reward before any penalty
pub fn base_reward(money_supply: u64, already_generated_coins: u64, emission_speed_factor: u32) -> u64 {
    money_supply.saturating_sub(already_generated_coins) >> emission_speed_factor
}

/// Compute the reward for a block of `current_block_size` bytes.
///
/// `median_size` is raised to `full_reward_zone` first. Returns `None`
/// when the block is more than twice the median. Fees are penalized only
/// when `penalize_fee` is set (major version 2 onwards).
pub fn get_block_reward(
    base_reward: u64,
    full_reward_zone: u64,
    median_size: u64,
    current_block_size: u64,
    fee: u64,
    penalize_fee: bool,
) -> Option<BlockReward> {
    let median_size = median_size.max(full_reward_zone);
    if current_block_size > 2 * median_size {
        return None;
    }

    let penalized_base = get_penalized_amount(base_reward, median_size, current_block_size);
    let penalized_fee = if penalize_fee {
        get_penalized_amount(fee, median_size, current_block_size)
    } else {
        fee
    };

    let emission_change = penalized_base as i128 - (fee as i128 - penalized_fee as i128);
    Some(BlockReward {
        reward: penalized_base.checked_add(penalized_fee)?,
        emission_change: i64::try_from(emission_change).ok()?,
    })
}

/// Split `amount` into one-digit denominations.
///
/// Low-order chunks are folded into a single dust amount while their sum
/// stays within `dust_threshold`. Dust, if any, comes first.
pub fn decompose_amount(amount: u64, dust_threshold: u64) -> Vec<u64> {
    let mut chunks = Vec::new();
    let mut amount = amount;
    let mut order: u64 = 1;
    let mut dust: u64 = 0;
    let mut dust_handled = false;

    while amount != 0 {
        let chunk = (amount % 10) * order;
        amount /= 10;
        order = order.wrapping_mul(10);

        if dust + chunk <= dust_threshold {
            dust += chunk;
        } else {
            if !dust_handled && dust != 0 {
                chunks.push(dust);
                dust_handled = true;
            }
            if chunk != 0 {
                chunks.push(chunk);
            }
        }
    }

    if !dust_handled && dust != 0 {
        chunks.push(dust);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_penalty_within_median() {
        assert_eq!(get_penalized_amount(1_000, 100, 50), 1_000);
        assert_eq!(get_penalized_amount(1_000, 100, 100), 1_000);
        assert_eq!(get_penalized_amount(0, 100, 150), 0);
    }

    #[test]
    fn test_penalty_is_quadratic() {
        // size = 1.5 * median keeps 75%
        assert_eq!(get_penalized_amount(1_000, 100, 150), 750);
        assert_eq!(get_penalized_amount(1_000, 100, 200), 0);
    }

    #[test]
    fn test_base_reward_follows_remaining_supply() {
        assert_eq!(base_reward(1 << 20, 0, 18), 4);
        assert_eq!(base_reward(1 << 20, 1 << 19, 18), 2);
        assert_eq!(base_reward(100, 200, 1), 0);
    }

    #[test]
    fn test_block_reward_small_block() {
        let r = get_block_reward(1_000, 10_000, 0, 500, 30, false).unwrap();
        assert_eq!(r.reward, 1_030);
        assert_eq!(r.emission_change, 1_000);
    }

    #[test]
    fn test_block_reward_too_big() {
        assert!(get_block_reward(1_000, 10_000, 0, 20_001, 0, false).is_none());
        assert!(get_block_reward(1_000, 10_000, 0, 20_000, 0, false).is_some());
    }

    #[test]
    fn test_fee_penalty_reduces_emission() {
        let r = get_block_reward(1_000, 100, 100, 150, 100, true).unwrap();
        assert_eq!(r.reward, 750 + 75);
        assert_eq!(r.emission_change, 750 - 25);

        let r = get_block_reward(1_000, 100, 100, 150, 100, false).unwrap();
        assert_eq!(r.reward, 750 + 100);
        assert_eq!(r.emission_change, 750);
    }

    #[test]
    fn test_decompose_amount() {
        assert_eq!(decompose_amount(0, 10), Vec::<u64>::new());
        assert_eq!(decompose_amount(1_234, 0), vec![4, 30, 200, 1_000]);
        assert_eq!(decompose_amount(1_234, 40), vec![34, 200, 1_000]);
        assert_eq!(decompose_amount(1_234, 10_000), vec![1_234]);
    }

    #[test]
    fn test_decompose_sums_to_amount() {
        for amount in [1u64, 9, 10, 999_999, 123_456_789, u64::MAX] {
            let parts = decompose_amount(amount, 1_000);
            assert_eq!(parts.iter().sum::<u64>(), amount);
        }
    }
}
