pub mod fee;
pub mod record;
pub mod update;

use alloy::primitives::{Address, U256};

use crate::config::thresholds::{DEFAULT_FEE, FEE_BASE};
use crate::store::Versioned;

/// Supported constant-product pair protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    UniswapV2,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::UniswapV2 => write!(f, "Uniswap V2"),
        }
    }
}

/// Position of the event (or read) that produced a piece of pair state.
///
/// Ordering is by `(block_number, tx_index, log_index)`; `observed_at` only
/// drives expiry and never participates in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub observed_at: i64, // unix seconds
}

impl Provenance {
    pub fn new(block_number: u64, tx_index: u64, log_index: u64, observed_at: i64) -> Self {
        Self {
            block_number,
            tx_index,
            log_index,
            observed_at,
        }
    }

    /// A contract read at `block_number` reflects every log of that block
    pub fn end_of_block(block_number: u64, observed_at: i64) -> Self {
        Self::new(block_number, u64::MAX, u64::MAX, observed_at)
    }

    pub fn position(&self) -> Position {
        (self.block_number, self.tx_index, self.log_index)
    }

    /// Strictly later in chain order than `other`
    pub fn succeeds(&self, other: &Provenance) -> bool {
        self.position() > other.position()
    }

    pub fn is_expired(&self, now: i64, ttl_secs: i64) -> bool {
        now > self.observed_at.saturating_add(ttl_secs)
    }
}

/// State of one AMM pair. Values are immutable: every update builds a new `Pair`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub protocol: Protocol,
    pub address: Address,
    /// `Address::ZERO` until the token identity is known
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    /// Fee in 1/FEE_BASE units; `None` when never reported or inferred
    pub fee: Option<u32>,
    /// Set when a read for this pair failed
    pub error: bool,
    pub provenance: Provenance,
    /// Parts of this state taken over from older updates
    pub inherited: Inherited,
}

/// Chain position of an event or read
pub type Position = (u64, u64, u64);

/// Where each part of a pair's state was written, for parts written by an
/// older update than the one in `Pair::provenance`. `None` means the part
/// is absent or was written by that update itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inherited {
    pub reserves: Option<Position>,
    pub fee: Option<Position>,
    /// Error flag, set by failed reads and cleared by full reads
    pub status: Option<Position>,
}

impl Pair {
    pub fn has_tokens(&self) -> bool {
        !self.token0.is_zero() && !self.token1.is_zero() && self.token0 != self.token1
    }

    pub fn effective_fee(&self) -> u32 {
        self.fee.unwrap_or(DEFAULT_FEE)
    }

    /// Reserve of `token` in this pair, if it is one of the two tokens
    pub fn reserve_of(&self, token: Address) -> Option<U256> {
        if token == self.token0 {
            Some(self.reserve0)
        } else if token == self.token1 {
            Some(self.reserve1)
        } else {
            None
        }
    }

    /// Whether this pair can be priced: known tokens, no read error, both
    /// reserves non-zero and a fee below 100%.
    pub fn is_priceable(&self) -> bool {
        !self.error
            && self.has_tokens()
            && !self.reserve0.is_zero()
            && !self.reserve1.is_zero()
            && self.effective_fee() < FEE_BASE
    }

    fn reserves_written_at(&self) -> Option<Position> {
        let carried = !self.reserve0.is_zero() || !self.reserve1.is_zero();
        self.inherited
            .reserves
            .or_else(|| carried.then_some(self.provenance.position()))
    }

    fn fee_written_at(&self) -> Option<Position> {
        self.inherited
            .fee
            .or_else(|| self.fee.map(|_| self.provenance.position()))
    }

    /// Full reads carry the token identity and failed reads the error flag;
    /// reserve-only updates carry neither.
    fn status_written_at(&self) -> Option<Position> {
        let carried = self.error || self.has_tokens();
        self.inherited
            .status
            .or_else(|| carried.then_some(self.provenance.position()))
    }

    /// Combine two states of the same pair. Each part comes from whichever
    /// side wrote it last, so the result does not depend on which of the two
    /// arrived first.
    pub fn join(&self, other: &Pair) -> Pair {
        let other_is_newer = other.provenance.succeeds(&self.provenance)
            || (other.provenance.position() == self.provenance.position()
                && other.provenance.observed_at > self.provenance.observed_at);
        let (newer, older) = if other_is_newer { (other, self) } else { (self, other) };
        let top = newer.provenance.position();
        let below_top = |at: Option<Position>| at.filter(|p| *p != top);

        let mut joined = newer.clone();

        let (source, at) = last_writer(newer, older, Pair::reserves_written_at);
        joined.reserve0 = source.reserve0;
        joined.reserve1 = source.reserve1;
        joined.inherited.reserves = below_top(at);

        let (source, at) = last_writer(newer, older, Pair::fee_written_at);
        joined.fee = source.fee;
        joined.inherited.fee = below_top(at);

        let (status_source, at) = last_writer(newer, older, Pair::status_written_at);
        joined.error = status_source.error;
        joined.inherited.status = below_top(at);

        // token identity never changes for a pair
        let identity = [status_source, newer, older]
            .into_iter()
            .find(|p| p.has_tokens())
            .unwrap_or(newer);
        joined.token0 = identity.token0;
        joined.token1 = identity.token1;

        joined
    }

    /// Net-of-fee exchange rate token0 -> token1
    pub fn rate_0_to_1(&self) -> f64 {
        net_rate(self.reserve0, self.reserve1, self.effective_fee())
    }

    /// Net-of-fee exchange rate token1 -> token0
    pub fn rate_1_to_0(&self) -> f64 {
        net_rate(self.reserve1, self.reserve0, self.effective_fee())
    }

    /// `(-ln(rate_0_to_1), -ln(rate_1_to_0))`, derived fresh on every call
    pub fn weights(&self) -> (f64, f64) {
        (-self.rate_0_to_1().ln(), -self.rate_1_to_0().ln())
    }

    /// Output of swapping `amount_in` of `token_in` through this pair, with
    /// the token received. `None` if `token_in` is not in the pair.
    pub fn swap(&self, token_in: Address, amount_in: U256) -> Option<(Address, U256)> {
        let fee = self.effective_fee();
        if token_in == self.token0 {
            Some((self.token1, get_amount_out(amount_in, self.reserve0, self.reserve1, fee)))
        } else if token_in == self.token1 {
            Some((self.token0, get_amount_out(amount_in, self.reserve1, self.reserve0, fee)))
        } else {
            None
        }
    }
}

impl Versioned for Pair {
    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn is_valid(&self) -> bool {
        !self.address.is_zero()
    }

    fn merge_previous(self, previous: &Self) -> Self {
        self.join(previous)
    }

    /// A stale update may still hold parts the current value lacks or holds
    /// from an even older write.
    fn absorb_stale(&self, stale: &Self) -> Option<Self> {
        let joined = self.join(stale);
        (joined != *self).then_some(joined)
    }
}

/// The side that wrote a part last, with the position it was written at.
/// `newer` wins ties.
fn last_writer<'a>(
    newer: &'a Pair,
    older: &'a Pair,
    written_at: fn(&Pair) -> Option<Position>,
) -> (&'a Pair, Option<Position>) {
    match (written_at(newer), written_at(older)) {
        (Some(n), Some(o)) if o > n => (older, Some(o)),
        (None, Some(o)) => (older, Some(o)),
        (n, _) => (newer, n),
    }
}

fn net_rate(reserve_in: U256, reserve_out: U256, fee: u32) -> f64 {
    let reserve_in = u256_to_f64_safe(reserve_in);
    let reserve_out = u256_to_f64_safe(reserve_out);
    if reserve_in <= 0.0 || fee >= FEE_BASE {
        return 0.0;
    }
    let fee_factor = f64::from(FEE_BASE - fee) / f64::from(FEE_BASE);
    reserve_out / reserve_in * fee_factor
}

/// Constant-product output with fee, in exact integer arithmetic:
///
/// `out = in*(B-f) * r_out / (r_in*B + in*(B-f))` where `B = FEE_BASE`.
///
/// Returns zero on any zero input or if an intermediate would overflow.
pub fn get_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256, fee: u32) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() || fee >= FEE_BASE {
        return U256::ZERO;
    }
    let amount_in_with_fee = match amount_in.checked_mul(U256::from(FEE_BASE - fee)) {
        Some(v) => v,
        None => return U256::ZERO,
    };
    let numerator = amount_in_with_fee.checked_mul(reserve_out);
    let denominator = reserve_in
        .checked_mul(U256::from(FEE_BASE))
        .and_then(|d| d.checked_add(amount_in_with_fee));
    match (numerator, denominator) {
        (Some(n), Some(d)) if !d.is_zero() => n / d,
        _ => U256::ZERO,
    }
}

/// Run `amount_in` of `token_in` through `path` in order. Returns zero if a
/// hop does not contain the token being carried or the path does not end
/// on `token_in`.
pub fn get_amounts_out<P: AsRef<Pair>>(token_in: Address, amount_in: U256, path: &[P]) -> U256 {
    let mut token = token_in;
    let mut amount = amount_in;
    for pair in path {
        match pair.as_ref().swap(token, amount) {
            Some((next_token, out)) => {
                token = next_token;
                amount = out;
            }
            None => return U256::ZERO,
        }
    }
    if token != token_in {
        return U256::ZERO;
    }
    amount
}

impl AsRef<Pair> for Pair {
    fn as_ref(&self) -> &Pair {
        self
    }
}

/// Safely convert U256 to f64, handling values larger than u128::MAX
pub fn u256_to_f64_safe(value: U256) -> f64 {
    if value.is_zero() {
        return 0.0;
    }

    if value <= U256::from(u128::MAX) {
        return value.to::<u128>() as f64;
    }

    // keep the top 64 bits and scale back up
    let bits = 256 - value.leading_zeros();
    let shift = bits.saturating_sub(64);
    let mantissa = (value >> shift).to::<u64>() as f64;
    mantissa * 2_f64.powi(shift as i32)
}


#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;

    #[test]
    fn test_provenance_order() {
        let a = Provenance::new(10, 2, 7, 0);
        assert!(Provenance::new(11, 0, 0, 0).succeeds(&a));
        assert!(Provenance::new(10, 3, 0, 0).succeeds(&a));
        assert!(Provenance::new(10, 2, 8, 0).succeeds(&a));
        assert!(!Provenance::new(10, 2, 7, 999).succeeds(&a));
        assert!(!Provenance::new(10, 1, 99, 0).succeeds(&a));
        assert!(Provenance::end_of_block(10, 0).succeeds(&a));
        assert!(!Provenance::end_of_block(9, 0).succeeds(&a));
    }

    #[test]
    fn test_expiry() {
        let p = Provenance::new(1, 0, 0, 1_000);
        assert!(!p.is_expired(1_000 + 86_400, 86_400));
        assert!(p.is_expired(1_000 + 86_401, 86_400));
    }

    #[test]
    fn test_get_amount_out() {
        // 1000 in against 100k/200k at 30 bps
        let out = get_amount_out(U256::from(1_000), U256::from(100_000), U256::from(200_000), 30);
        // 1000*9970*200000 / (100000*10000 + 1000*9970) = 1974.3...
        assert_eq!(out, U256::from(1974));
        assert_eq!(get_amount_out(U256::ZERO, U256::from(1), U256::from(1), 30), U256::ZERO);
        assert_eq!(get_amount_out(U256::from(1), U256::ZERO, U256::from(1), 30), U256::ZERO);
        assert_eq!(get_amount_out(U256::from(1), U256::from(1), U256::ZERO, 30), U256::ZERO);
    }

    #[test]
    fn test_get_amounts_out_rejects_mismatched_path() {
        let weth = token(1);
        let usdc = token(2);
        let dai = token(3);
        let p1 = pair(1, weth, usdc, 100 * E18, 200 * E18);
        let p2 = pair(2, dai, usdc, 100 * E18, 100 * E18);
        // after p1 we hold usdc; p2 gives dai, which is not where we started
        assert_eq!(get_amounts_out(weth, U256::from(E18), &[p1.clone(), p2]), U256::ZERO);

        let unrelated = pair(3, dai, token(4), 100 * E18, 100 * E18);
        assert_eq!(get_amounts_out(weth, U256::from(E18), &[p1, unrelated]), U256::ZERO);
    }

    #[test]
    fn test_weights_follow_reserves() {
        let p = pair(1, token(1), token(2), 1_000 * E18, 2_000 * E18);
        let (w0, w1) = p.weights();
        assert!((w0 - -(2.0f64 * 0.997).ln()).abs() < 1e-12);
        assert!((w1 - -(0.5f64 * 0.997).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_priceable() {
        let mut p = pair(1, token(1), token(2), E18, E18);
        assert!(p.is_priceable());
        p.reserve1 = U256::ZERO;
        assert!(!p.is_priceable());
        p.reserve1 = U256::from(E18);
        p.error = true;
        assert!(!p.is_priceable());
        p.error = false;
        p.token1 = Address::ZERO;
        assert!(!p.is_priceable());
    }

    #[test]
    fn test_merge_inherits_identity() {
        let full = pair(1, token(1), token(2), E18, E18);
        let mut sync = full.clone();
        sync.token0 = Address::ZERO;
        sync.token1 = Address::ZERO;
        sync.fee = None;
        sync.reserve0 = U256::from(5u64);
        let merged = sync.merge_previous(&full);
        assert_eq!(merged.token0, token(1));
        assert_eq!(merged.token1, token(2));
        assert_eq!(merged.fee, Some(30));
        assert_eq!(merged.reserve0, U256::from(5u64));
    }

    #[test]
    fn test_join_takes_each_part_from_its_last_writer() {
        let mut full = pair(1, token(1), token(2), E18, 2 * E18);
        full.fee = Some(25);
        full.provenance = Provenance::end_of_block(8, 0);

        let mut failed = full.clone();
        failed.token0 = Address::ZERO;
        failed.token1 = Address::ZERO;
        failed.reserve0 = U256::ZERO;
        failed.reserve1 = U256::ZERO;
        failed.fee = None;
        failed.error = true;
        failed.provenance = Provenance::end_of_block(9, 0);

        let joined = failed.join(&full);
        assert_eq!(joined, full.join(&failed));
        assert_eq!(joined.provenance, failed.provenance);
        assert_eq!(joined.reserve1, U256::from(2 * E18));
        assert_eq!(joined.token0, token(1));
        assert!(joined.error);
        assert_eq!(joined.inherited.reserves, Some(full.provenance.position()));
        assert_eq!(joined.inherited.status, None);
    }

    #[test]
    fn test_u256_to_f64_large() {
        let v = U256::from(u128::MAX) * U256::from(4u8);
        let f = u256_to_f64_safe(v);
        assert!((f / (u128::MAX as f64 * 4.0) - 1.0).abs() < 1e-12);
    }
}
