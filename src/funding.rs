// 5.0: funding. longs pay shorts (or vice versa) in proportion to how far the
// pool price sits from the index. nothing is pushed eagerly: each market carries
// a time-weighted premium integral per side, and every trader checkpoints the
// growth at their last settlement. pending payment = size * growth delta / period.
//
// the paying side accrues the raw premium; the receiving side accrues the premium
// scaled by payer OI / receiver OI, so total paid always equals total received.
// if either side has no open interest, the interval accrues nothing.
//
// sign convention: a positive payment is owed BY the trader.

use crate::types::{BaseAmount, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Daily funding period, in seconds.
pub const FUNDING_PERIOD_SECS: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingGrowth {
    /// Time-weighted (mark - index) premium accrued against longs, quote-seconds
    /// per base unit.
    pub tw_premium_long: Decimal,
    /// Same integral, against shorts.
    pub tw_premium_short: Decimal,
    pub last_settled: Timestamp,
}

impl FundingGrowth {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            tw_premium_long: Decimal::ZERO,
            tw_premium_short: Decimal::ZERO,
            last_settled: timestamp,
        }
    }
}

// 5.1: fold the elapsed premium into the per-side integrals. pure; the caller
// decides when a market is "touched".
pub fn accrue_premium(
    growth: &FundingGrowth,
    mark_price: Price,
    index_price: Price,
    long_oi: Decimal,
    short_oi: Decimal,
    now: Timestamp,
) -> FundingGrowth {
    let elapsed = growth.last_settled.elapsed_secs(&now);
    if elapsed == 0 {
        return growth.clone();
    }

    let mut next = growth.clone();
    next.last_settled = now;

    if long_oi <= Decimal::ZERO || short_oi <= Decimal::ZERO {
        // one-sided market: no counterparty, nothing accrues
        return next;
    }

    let premium = (mark_price.value() - index_price.value()) * Decimal::from(elapsed);
    if premium.is_zero() {
        return next;
    }

    if premium > Decimal::ZERO {
        // mark above index: longs pay, shorts receive scaled by OI imbalance
        next.tw_premium_long += premium;
        next.tw_premium_short += premium * long_oi / short_oi;
    } else {
        // mark below index: shorts pay, longs receive
        next.tw_premium_short += premium;
        next.tw_premium_long += premium * short_oi / long_oi;
    }

    next
}

// 5.2: a trader's pending payment since their checkpoints. positive = owed by
// the trader. size is in pool units (multiplier already applied).
pub fn pending_payment(
    pool_size: BaseAmount,
    growth: &FundingGrowth,
    checkpoint_long: Decimal,
    checkpoint_short: Decimal,
) -> Quote {
    if pool_size.is_zero() {
        return Quote::zero();
    }
    let delta = if pool_size.is_long() {
        growth.tw_premium_long - checkpoint_long
    } else {
        growth.tw_premium_short - checkpoint_short
    };
    Quote::new(pool_size.value() * delta / Decimal::from(FUNDING_PERIOD_SECS))
}
