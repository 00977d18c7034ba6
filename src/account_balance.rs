// 6.0: the position and PnL ledger. signed size + signed open notional per
// (trader, market), owed realized PnL per trader, and the per-market multiplier
// that keeps ledger exposure consistent with pool inventory after a repeg.
//
// sign conventions:
//   size > 0            long
//   open_notional < 0   quote paid out to acquire the position (longs)
//   unrealized pnl      pool_size * mark + open_notional
//
// ledger units vs pool units: the pool trades pool units; the ledger records
// oracle-denominated units. pool = ledger * multiplier(side). multipliers start
// at 1 and only a repeg moves them.

use crate::funding::{self, FundingGrowth};
use crate::types::{BaseAmount, MarketId, Price, Quote, Side, TraderId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Multiplier conversions divide and re-multiply; below this a residual size is
// rounding dust, not a position.
fn size_dust() -> Decimal {
    dec!(0.000000000001)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Ledger units; multiply by the side multiplier for pool units.
    pub size: BaseAmount,
    pub open_notional: Quote,
    pub tw_premium_long_checkpoint: Decimal,
    pub tw_premium_short_checkpoint: Decimal,
}

impl Position {
    fn new(growth: &FundingGrowth) -> Self {
        Self {
            size: BaseAmount::zero(),
            open_notional: Quote::zero(),
            tw_premium_long_checkpoint: growth.tw_premium_long,
            tw_premium_short_checkpoint: growth.tw_premium_short,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_zero() && self.open_notional.is_zero()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Multipliers {
    pub long: Decimal,
    pub short: Decimal,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self {
            long: Decimal::ONE,
            short: Decimal::ONE,
        }
    }
}

impl Multipliers {
    pub fn for_side(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long,
            Side::Short => self.short,
        }
    }

    pub fn rescale(&mut self, factor: Decimal) {
        debug_assert!(factor > Decimal::ZERO);
        self.long *= factor;
        self.short *= factor;
    }
}

/// What a trade did to the ledger.
#[derive(Debug, Clone)]
pub struct TradeApplication {
    pub realized_pnl: Quote,
    pub new_size: BaseAmount,
    pub new_open_notional: Quote,
    pub closed_position: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBalance {
    positions: HashMap<(TraderId, MarketId), Position>,
    owed_realized_pnl: HashMap<TraderId, Quote>,
    multipliers: HashMap<MarketId, Multipliers>,
}

impl AccountBalance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, trader: TraderId, market: MarketId) -> Option<&Position> {
        self.positions.get(&(trader, market))
    }

    pub fn has_open_positions(&self, trader: TraderId) -> bool {
        self.positions
            .iter()
            .any(|((t, _), p)| *t == trader && !p.size.is_zero())
    }

    pub fn markets_of(&self, trader: TraderId) -> Vec<MarketId> {
        self.positions
            .keys()
            .filter(|(t, _)| *t == trader)
            .map(|(_, m)| *m)
            .collect()
    }

    pub fn multipliers(&self, market: MarketId) -> Multipliers {
        self.multipliers.get(&market).copied().unwrap_or_default()
    }

    pub fn rescale_multipliers(&mut self, market: MarketId, factor: Decimal) {
        self.multipliers.entry(market).or_default().rescale(factor);
    }

    /// Size in pool units, signed.
    pub fn pool_size(&self, trader: TraderId, market: MarketId) -> BaseAmount {
        let Some(pos) = self.position(trader, market) else {
            return BaseAmount::zero();
        };
        self.to_pool_units(market, pos.size)
    }

    fn to_pool_units(&self, market: MarketId, ledger: BaseAmount) -> BaseAmount {
        match ledger.side() {
            None => BaseAmount::zero(),
            Some(side) => BaseAmount::new(ledger.value() * self.multipliers(market).for_side(side)),
        }
    }

    /// Taker open interest per side in pool units, for funding accrual.
    pub fn open_interest(&self, market: MarketId) -> (Decimal, Decimal) {
        let mut long = Decimal::ZERO;
        let mut short = Decimal::ZERO;
        for ((_, m), pos) in &self.positions {
            if *m != market {
                continue;
            }
            let pool = self.to_pool_units(market, pos.size).value();
            if pool > Decimal::ZERO {
                long += pool;
            } else {
                short += -pool;
            }
        }
        (long, short)
    }

    pub fn owed_realized_pnl(&self, trader: TraderId) -> Quote {
        self.owed_realized_pnl
            .get(&trader)
            .copied()
            .unwrap_or(Quote::zero())
    }

    pub fn add_owed_realized_pnl(&mut self, trader: TraderId, delta: Quote) {
        let entry = self
            .owed_realized_pnl
            .entry(trader)
            .or_insert(Quote::zero());
        *entry = entry.add(delta);
    }

    /// Drain owed PnL into the vault's settlement balance.
    pub fn take_owed_realized_pnl(&mut self, trader: TraderId) -> Quote {
        self.owed_realized_pnl.remove(&trader).unwrap_or(Quote::zero())
    }

    // 6.1: lazy funding settlement. realizes the pending payment into owed PnL
    // and refreshes both checkpoints. every position/liquidity touch routes
    // through here first, so the position's side is constant between checkpoints.
    pub fn settle_funding(
        &mut self,
        trader: TraderId,
        market: MarketId,
        growth: &FundingGrowth,
    ) -> Quote {
        let pool_size = self.pool_size(trader, market);
        let Some(pos) = self.positions.get_mut(&(trader, market)) else {
            return Quote::zero();
        };

        let payment = funding::pending_payment(
            pool_size,
            growth,
            pos.tw_premium_long_checkpoint,
            pos.tw_premium_short_checkpoint,
        );
        pos.tw_premium_long_checkpoint = growth.tw_premium_long;
        pos.tw_premium_short_checkpoint = growth.tw_premium_short;

        if !payment.is_zero() {
            self.add_owed_realized_pnl(trader, payment.negate());
        }
        payment
    }

    pub fn pending_funding(
        &self,
        trader: TraderId,
        market: MarketId,
        growth: &FundingGrowth,
    ) -> Quote {
        let pool_size = self.pool_size(trader, market);
        let Some(pos) = self.position(trader, market) else {
            return Quote::zero();
        };
        funding::pending_payment(
            pool_size,
            growth,
            pos.tw_premium_long_checkpoint,
            pos.tw_premium_short_checkpoint,
        )
    }

    // 6.2: multiplier conversion for a raw pool-unit trade delta. increases use
    // the delta's own side; reductions use the existing position's side; a flip
    // splits at the zero crossing. asymmetric on purpose.
    pub fn modify_base_for_multiplier(
        &self,
        market: MarketId,
        existing: BaseAmount,
        pool_delta: Decimal,
    ) -> Decimal {
        if pool_delta.is_zero() {
            return Decimal::ZERO;
        }
        let m = self.multipliers(market);
        let delta_side = if pool_delta > Decimal::ZERO {
            Side::Long
        } else {
            Side::Short
        };

        match existing.side() {
            None => pool_delta / m.for_side(delta_side),
            Some(side) if side == delta_side => pool_delta / m.for_side(delta_side),
            Some(side) => {
                let existing_pool = existing.value() * m.for_side(side);
                if pool_delta.abs() <= existing_pool.abs() {
                    pool_delta / m.for_side(side)
                } else {
                    // flip: the close leg consumes the whole existing position,
                    // the remainder opens on the other side
                    let open_pool = pool_delta + existing_pool;
                    -existing.value() + open_pool / m.for_side(delta_side)
                }
            }
        }
    }

    // 6.3: fold a trade into the position. pool_base_delta and quote_delta are
    // trader-signed (quote net of fees). returns the realized PnL, already booked
    // into owed PnL.
    pub fn apply_trade(
        &mut self,
        trader: TraderId,
        market: MarketId,
        pool_base_delta: Decimal,
        quote_delta: Quote,
        growth: &FundingGrowth,
    ) -> TradeApplication {
        self.settle_funding(trader, market, growth);

        let existing = self
            .positions
            .get(&(trader, market))
            .map(|p| p.size)
            .unwrap_or(BaseAmount::zero());
        let ledger_delta = self.modify_base_for_multiplier(market, existing, pool_base_delta);

        let pos = self
            .positions
            .entry((trader, market))
            .or_insert_with(|| Position::new(growth));

        let old_size = pos.size.value();
        let mut new_size = old_size + ledger_delta;
        let mut realized = Quote::zero();

        let same_direction = old_size.is_zero()
            || (old_size > Decimal::ZERO) == (ledger_delta > Decimal::ZERO);

        if same_direction {
            pos.open_notional = pos.open_notional.add(quote_delta);
        } else if ledger_delta.abs() <= old_size.abs() {
            // reduce: realize the closed share of the open notional against the
            // quote this trade produced
            let ratio = ledger_delta.abs() / old_size.abs();
            let closed_notional = pos.open_notional.mul(ratio);
            realized = quote_delta.add(closed_notional);
            pos.open_notional = pos.open_notional.sub(closed_notional);
        } else {
            // flip: close the whole position with a proportional share of the
            // quote, the rest opens the new side
            let close_fraction = old_size.abs() / ledger_delta.abs();
            let quote_for_close = quote_delta.mul(close_fraction);
            realized = quote_for_close.add(pos.open_notional);
            pos.open_notional = quote_delta.sub(quote_for_close);
        }

        if !new_size.is_zero() && new_size.abs() <= size_dust() {
            // snap residual dust from multiplier round trips to a clean close
            realized = realized.add(pos.open_notional);
            pos.open_notional = Quote::zero();
            new_size = Decimal::ZERO;
        }
        pos.size = BaseAmount::new(new_size);

        let closed = pos.is_empty();
        let application = TradeApplication {
            realized_pnl: realized,
            new_size: pos.size,
            new_open_notional: pos.open_notional,
            closed_position: closed,
        };

        if !realized.is_zero() {
            self.add_owed_realized_pnl(trader, realized);
        }
        if closed {
            self.positions.remove(&(trader, market));
        }
        application
    }

    // 6.4: mark-to-market against the pool price, never the index.
    pub fn unrealized_pnl(&self, trader: TraderId, market: MarketId, mark: Price) -> Quote {
        let Some(pos) = self.position(trader, market) else {
            return Quote::zero();
        };
        let pool_size = self.to_pool_units(market, pos.size);
        Quote::new(pool_size.value() * mark.value() + pos.open_notional.value())
    }

    pub fn total_unrealized_pnl(
        &self,
        trader: TraderId,
        marks: &HashMap<MarketId, Price>,
    ) -> Quote {
        self.markets_of(trader)
            .into_iter()
            .filter_map(|m| marks.get(&m).map(|mark| self.unrealized_pnl(trader, m, *mark)))
            .sum()
    }

    /// Cross-margin requirement: sum of |notional| * ratio over every market the
    /// trader is in.
    pub fn margin_requirement(
        &self,
        trader: TraderId,
        marks: &HashMap<MarketId, Price>,
        ratio: Decimal,
    ) -> Quote {
        let total: Decimal = self
            .markets_of(trader)
            .into_iter()
            .filter_map(|m| {
                let mark = marks.get(&m)?;
                let pool_size = self.pool_size(trader, m);
                Some(pool_size.abs() * mark.value())
            })
            .sum();
        Quote::new(total * ratio)
    }

    pub fn total_position_value(
        &self,
        trader: TraderId,
        marks: &HashMap<MarketId, Price>,
    ) -> Quote {
        self.margin_requirement(trader, marks, Decimal::ONE)
    }

    pub fn traders_in_market(&self, market: MarketId) -> Vec<TraderId> {
        self.positions
            .keys()
            .filter(|(_, m)| *m == market)
            .map(|(t, _)| *t)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use rust_decimal_macros::dec;

    fn growth() -> FundingGrowth {
        FundingGrowth::new(Timestamp::from_secs(0))
    }

    fn ledger() -> AccountBalance {
        AccountBalance::new()
    }

    const T: TraderId = TraderId(1);
    const M: MarketId = MarketId(1);

    #[test]
    fn open_long_records_negative_notional() {
        let mut ab = ledger();
        let app = ab.apply_trade(T, M, dec!(1), Quote::new(dec!(-100)), &growth());

        assert_eq!(app.new_size.value(), dec!(1));
        assert_eq!(app.new_open_notional.value(), dec!(-100));
        assert_eq!(app.realized_pnl, Quote::zero());
    }

    #[test]
    fn full_close_realizes_pnl() {
        let mut ab = ledger();
        ab.apply_trade(T, M, dec!(1), Quote::new(dec!(-100)), &growth());
        // close at a higher price: receive 110 quote for the 1 base
        let app = ab.apply_trade(T, M, dec!(-1), Quote::new(dec!(110)), &growth());

        assert!(app.closed_position);
        assert_eq!(app.realized_pnl.value(), dec!(10));
        assert!(ab.position(T, M).is_none());
        assert_eq!(ab.owed_realized_pnl(T).value(), dec!(10));
    }

    #[test]
    fn partial_close_keeps_proportional_notional() {
        let mut ab = ledger();
        ab.apply_trade(T, M, dec!(2), Quote::new(dec!(-200)), &growth());
        let app = ab.apply_trade(T, M, dec!(-1), Quote::new(dec!(105)), &growth());

        assert_eq!(app.new_size.value(), dec!(1));
        assert_eq!(app.new_open_notional.value(), dec!(-100));
        assert_eq!(app.realized_pnl.value(), dec!(5));
    }

    #[test]
    fn flip_splits_at_zero() {
        let mut ab = ledger();
        ab.apply_trade(T, M, dec!(1), Quote::new(dec!(-100)), &growth());
        // sell 4 at 100 each: 1 closes the long flat, 3 open a short
        let app = ab.apply_trade(T, M, dec!(-4), Quote::new(dec!(400)), &growth());

        assert_eq!(app.new_size.value(), dec!(-3));
        assert_eq!(app.new_open_notional.value(), dec!(300));
        assert_eq!(app.realized_pnl.value(), dec!(0));
    }

    #[test]
    fn unrealized_pnl_marks_to_pool_price() {
        let mut ab = ledger();
        ab.apply_trade(T, M, dec!(1), Quote::new(dec!(-100)), &growth());

        let up = ab.unrealized_pnl(T, M, Price::new_unchecked(dec!(120)));
        assert_eq!(up.value(), dec!(20));
        let down = ab.unrealized_pnl(T, M, Price::new_unchecked(dec!(90)));
        assert_eq!(down.value(), dec!(-10));
    }

    #[test]
    fn multiplier_converts_pool_deltas() {
        let mut ab = ledger();
        ab.rescale_multipliers(M, dec!(2));

        // opening: pool delta 2 becomes ledger 1
        let d = ab.modify_base_for_multiplier(M, BaseAmount::zero(), dec!(2));
        assert_eq!(d, dec!(1));

        ab.apply_trade(T, M, dec!(2), Quote::new(dec!(-200)), &growth());
        assert_eq!(ab.position(T, M).unwrap().size.value(), dec!(1));
        assert_eq!(ab.pool_size(T, M).value(), dec!(2));

        // reducing uses the existing side's multiplier
        let d = ab.modify_base_for_multiplier(M, BaseAmount::new(dec!(1)), dec!(-1));
        assert_eq!(d, dec!(-0.5));
    }

    #[test]
    fn flip_through_multiplier_splits_sides() {
        let mut ab = ledger();
        // asymmetric multipliers
        ab.multipliers.insert(
            M,
            Multipliers {
                long: dec!(2),
                short: dec!(4),
            },
        );

        // existing long: ledger 1 = pool 2. sell 6 pool units:
        // 2 close the long (ledger -1), 4 open a short (ledger -1)
        let d = ab.modify_base_for_multiplier(M, BaseAmount::new(dec!(1)), dec!(-6));
        assert_eq!(d, dec!(-2));
    }

    #[test]
    fn funding_settlement_books_owed_pnl() {
        let mut ab = ledger();
        ab.apply_trade(T, M, dec!(1), Quote::new(dec!(-100)), &growth());

        let mut g = growth();
        g.tw_premium_long = dec!(86400); // 1 quote per base unit pending
        g.tw_premium_short = dec!(86400);

        let payment = ab.settle_funding(T, M, &g);
        assert_eq!(payment.value(), dec!(1));
        assert_eq!(ab.owed_realized_pnl(T).value(), dec!(-1));

        // settled: nothing further pending
        assert_eq!(ab.pending_funding(T, M, &g), Quote::zero());
    }

    #[test]
    fn open_interest_sums_pool_units() {
        let mut ab = ledger();
        ab.apply_trade(TraderId(1), M, dec!(2), Quote::new(dec!(-200)), &growth());
        ab.apply_trade(TraderId(2), M, dec!(-3), Quote::new(dec!(300)), &growth());

        let (long, short) = ab.open_interest(M);
        assert_eq!(long, dec!(2));
        assert_eq!(short, dec!(3));
    }

    #[test]
    fn cross_margin_aggregates_markets() {
        let mut ab = ledger();
        ab.apply_trade(T, MarketId(1), dec!(1), Quote::new(dec!(-100)), &growth());
        ab.apply_trade(T, MarketId(2), dec!(-2), Quote::new(dec!(60)), &growth());

        let mut marks = HashMap::new();
        marks.insert(MarketId(1), Price::new_unchecked(dec!(100)));
        marks.insert(MarketId(2), Price::new_unchecked(dec!(30)));

        // |1*100| + |-2*30| = 160; at 10% IM
        let req = ab.margin_requirement(T, &marks, dec!(0.1));
        assert_eq!(req.value(), dec!(16));
    }
}
