//! Fee tier inference from paired Swap + Sync logs
//!
//! A Uniswap V2 style pair emits `Sync` (post-swap reserves) immediately
//! before `Swap` in the same transaction. Given both, the fee is the value
//! that makes the constant-product invariant hold across the trade.

use alloy::primitives::{Address, U256};
use std::collections::HashMap;

use super::{u256_to_f64_safe, Provenance};
use crate::config::thresholds::{DEFAULT_FEE, FEE_BASE};

/// Above this raw result the pool may be a stableswap curve rather than x*y=k
const STABLE_CHECK_ABOVE: u32 = 200;
const STABLE_FEE: u32 = 5;
const STABLE_INVARIANT_TOLERANCE: f64 = 1.0001;

/// Decoded `Swap(sender, amount0In, amount1In, amount0Out, amount1Out, to)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {
    pub pair: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    pub provenance: Provenance,
}

/// Decoded `Sync(reserve0, reserve1)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub pair: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub provenance: Provenance,
}

/// Infer the fee of a pair (in 1/FEE_BASE units) from one swap and the
/// reserves reported right after it.
///
/// Best effort: degenerate input yields [`DEFAULT_FEE`].
pub fn calculate_pair_fee(
    amount0_in: U256,
    amount1_in: U256,
    amount0_out: U256,
    amount1_out: U256,
    reserve0: U256,
    reserve1: U256,
) -> u32 {
    let a0i = u256_to_f64_safe(amount0_in);
    let a1i = u256_to_f64_safe(amount1_in);
    let a0o = u256_to_f64_safe(amount0_out);
    let a1o = u256_to_f64_safe(amount1_out);
    let r0 = u256_to_f64_safe(reserve0);
    let r1 = u256_to_f64_safe(reserve1);

    // reserves before the swap
    let pr0 = r0 + a0o - a0i;
    let pr1 = r1 + a1o - a1i;

    let ratio = if pr0 < pr1 {
        (r0 * r1 / pr1 - pr0) / (r0 - pr0)
    } else {
        (r0 * r1 / pr0 - pr1) / (r1 - pr1)
    };
    let raw = (ratio.abs() * f64::from(FEE_BASE)).ceil();
    if !raw.is_finite() || raw <= 0.0 || raw >= f64::from(FEE_BASE) {
        return DEFAULT_FEE;
    }
    let mut fee = raw as u32;

    if fee > STABLE_CHECK_ABOVE {
        // stableswap invariant x^3*y + y^3*x barely moves on a fee-paying swap
        let after = r0.powi(3) * r1 + r1.powi(3) * r0;
        let before = pr0.powi(3) * pr1 + pr1.powi(3) * pr0;
        let dk = after / before;
        if dk > 1.0 && dk < STABLE_INVARIANT_TOLERANCE {
            fee = STABLE_FEE;
        }
    }

    snap_fee(fee)
}

/// Ceil rounding lands one below the common tiers
fn snap_fee(fee: u32) -> u32 {
    match fee {
        14 => 15,
        19 => 20,
        24 => 25,
        29 => 30,
        other => other,
    }
}

/// Pair each Sync with the Swap that directly follows it (same block and
/// transaction, log index + 1, same pair) and infer that pair's fee.
///
/// The first inference per pair in the batch wins.
pub fn infer_fees(swaps: &[SwapEvent], syncs: &[SyncEvent]) -> HashMap<Address, u32> {
    let swaps_by_position: HashMap<(u64, u64, u64), &SwapEvent> =
        swaps.iter().map(|s| (s.provenance.position(), s)).collect();

    let mut fees = HashMap::new();
    for sync in syncs {
        if fees.contains_key(&sync.pair) {
            continue;
        }
        let (block, tx, log) = sync.provenance.position();
        let Some(next_log) = log.checked_add(1) else {
            continue;
        };
        let Some(swap) = swaps_by_position.get(&(block, tx, next_log)) else {
            continue;
        };
        if swap.pair != sync.pair {
            continue;
        }

        let fee = calculate_pair_fee(
            swap.amount0_in,
            swap.amount1_in,
            swap.amount0_out,
            swap.amount1_out,
            sync.reserve0,
            sync.reserve1,
        );
        tracing::trace!("Inferred fee {} for pair {}", fee, sync.pair);
        fees.insert(sync.pair, fee);
    }
    fees
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::get_amount_out;
    use crate::dex::test_helpers::*;

    fn u(s: &str) -> U256 {
        U256::from_str_radix(s, 10).expect("decimal literal")
    }

    /// Swap token0 in against known pre-swap reserves at `fee`, then infer it back
    fn round_trip(fee: u32) -> u32 {
        let pre0 = U256::from(1_000 * E18);
        let pre1 = U256::from(2_000 * E18);
        let amount_in = U256::from(E18);
        let amount_out = get_amount_out(amount_in, pre0, pre1, fee);
        calculate_pair_fee(
            amount_in,
            U256::ZERO,
            U256::ZERO,
            amount_out,
            pre0 + amount_in,
            pre1 - amount_out,
        )
    }

    #[test]
    fn test_recovers_known_fee() {
        assert_eq!(round_trip(30), 30);
        assert_eq!(round_trip(25), 25);
    }

    #[test]
    fn test_observed_swap_sample() {
        // token1 in, token0 out on a volatile pair
        let fee = calculate_pair_fee(
            U256::ZERO,
            u("2000000000000000"),
            u("14472300943115752421"),
            U256::ZERO,
            u("14863654188967624342618"),
            u("2051974905703706567"),
        );
        assert_eq!(fee, 20);
    }

    #[test]
    fn test_stable_pool_detected() {
        let fee = calculate_pair_fee(
            U256::from(2_151_714_554u64),
            U256::ZERO,
            U256::ZERO,
            U256::from(2_151_176_174u64),
            U256::from(124_614_963_475u64),
            U256::from(129_682_145_128u64),
        );
        assert_eq!(fee, 5);
    }

    #[test]
    fn test_degenerate_input_defaults() {
        let zero = U256::ZERO;
        assert_eq!(calculate_pair_fee(zero, zero, zero, zero, zero, zero), DEFAULT_FEE);
        // nothing moved: 0/0
        let r = U256::from(1_000u64);
        assert_eq!(calculate_pair_fee(zero, zero, zero, zero, r, r), DEFAULT_FEE);
    }

    #[test]
    fn test_snapping() {
        assert_eq!(snap_fee(29), 30);
        assert_eq!(snap_fee(24), 25);
        assert_eq!(snap_fee(19), 20);
        assert_eq!(snap_fee(14), 15);
        assert_eq!(snap_fee(26), 26);
    }

    #[test]
    fn test_infer_fees_pairs_sync_with_following_swap() {
        let pair_a = addr(1);
        let pair_b = addr(2);
        let pre0 = U256::from(1_000 * E18);
        let pre1 = U256::from(2_000 * E18);
        let amount_in = U256::from(E18);
        let amount_out = get_amount_out(amount_in, pre0, pre1, 30);

        let sync = SyncEvent {
            pair: pair_a,
            reserve0: pre0 + amount_in,
            reserve1: pre1 - amount_out,
            provenance: Provenance::new(100, 3, 7, 0),
        };
        let swap = SwapEvent {
            pair: pair_a,
            amount0_in: amount_in,
            amount1_in: U256::ZERO,
            amount0_out: U256::ZERO,
            amount1_out: amount_out,
            provenance: Provenance::new(100, 3, 8, 0),
        };
        // same position shape but a different pair: must not be matched
        let foreign_sync = SyncEvent {
            pair: pair_b,
            provenance: Provenance::new(100, 4, 1, 0),
            ..sync.clone()
        };
        let foreign_swap = SwapEvent {
            pair: pair_a,
            provenance: Provenance::new(100, 4, 2, 0),
            ..swap.clone()
        };

        let fees = infer_fees(&[swap, foreign_swap], &[sync, foreign_sync]);
        assert_eq!(fees.get(&pair_a), Some(&30));
        assert!(!fees.contains_key(&pair_b));
    }

    #[test]
    fn test_infer_fees_ignores_unpaired_events() {
        let sync = SyncEvent {
            pair: addr(1),
            reserve0: U256::from(10u64),
            reserve1: U256::from(10u64),
            provenance: Provenance::new(1, 0, 5, 0),
        };
        let swap = SwapEvent {
            pair: addr(1),
            amount0_in: U256::from(1u64),
            amount1_in: U256::ZERO,
            amount0_out: U256::ZERO,
            amount1_out: U256::from(1u64),
            // two logs later, not adjacent
            provenance: Provenance::new(1, 0, 7, 0),
        };
        assert!(infer_fees(&[swap], &[sync]).is_empty());
    }
}
