// 12.0: liquidity order book. owns every LiquidityOrder and the virtual pools;
// nothing else writes a pool. fee growth checkpoints turn pool fee accounting
// into per-order claims; maker inventory imbalance (price moved while liquidity
// was open) becomes a taker position when liquidity is removed.

use crate::pool::{PoolError, SwapComputation, SwapParams, VirtualPool};
use crate::types::{Liquidity, MarketId, Price, Ratio, Tick, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OrderBookError {
    #[error("no pool for market {0:?}")]
    PoolNotFound(MarketId),

    #[error("pool for market {0:?} already exists")]
    PoolAlreadyExists(MarketId),

    #[error("no liquidity order for trader {trader:?} in market {market:?} at [{lower}, {upper})")]
    OrderNotFound {
        trader: TraderId,
        market: MarketId,
        lower: i32,
        upper: i32,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type OrderKey = (TraderId, MarketId, i32, i32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityOrder {
    pub trader: TraderId,
    pub market: MarketId,
    pub tick_lower: Tick,
    pub tick_upper: Tick,
    pub liquidity: Liquidity,
    /// Fee growth inside the range at the last claim.
    pub fee_growth_inside_checkpoint: Decimal,
    /// Fees realized but not yet claimed into owed PnL (accumulated by repeg).
    pub pending_fee: Decimal,
    /// Base/quote the maker has put behind this order; the reference point for
    /// the passive imbalance.
    pub base_provided: Decimal,
    pub quote_provided: Decimal,
}

impl LiquidityOrder {
    fn key(&self) -> OrderKey {
        (
            self.trader,
            self.market,
            self.tick_lower.value(),
            self.tick_upper.value(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct AddLiquidityOutcome {
    pub base_owed: Decimal,
    pub quote_owed: Decimal,
    /// Fees claimed into owed PnL by this touch.
    pub fees_claimed: Decimal,
    pub order_liquidity: Liquidity,
}

#[derive(Debug, Clone)]
pub struct RemoveLiquidityOutcome {
    pub base_freed: Decimal,
    pub quote_freed: Decimal,
    /// Maker inventory imbalance handed to the position ledger, trader-signed.
    pub base_delta: Decimal,
    pub quote_delta: Decimal,
    pub fees_claimed: Decimal,
    pub order_closed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pools: BTreeMap<MarketId, VirtualPool>,
    orders: BTreeMap<OrderKey, LiquidityOrder>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_pool(
        &mut self,
        market: MarketId,
        initial_price: Price,
        fee_ratio: Ratio,
        insurance_fee_share: Ratio,
        tick_spacing: i32,
    ) -> Result<(), OrderBookError> {
        if self.pools.contains_key(&market) {
            return Err(OrderBookError::PoolAlreadyExists(market));
        }
        let pool = VirtualPool::new(initial_price, fee_ratio, insurance_fee_share, tick_spacing)?;
        self.pools.insert(market, pool);
        Ok(())
    }

    pub fn pool(&self, market: MarketId) -> Result<&VirtualPool, OrderBookError> {
        self.pools
            .get(&market)
            .ok_or(OrderBookError::PoolNotFound(market))
    }

    fn pool_mut(&mut self, market: MarketId) -> Result<&mut VirtualPool, OrderBookError> {
        self.pools
            .get_mut(&market)
            .ok_or(OrderBookError::PoolNotFound(market))
    }

    pub fn mark_price(&self, market: MarketId) -> Result<Price, OrderBookError> {
        Ok(self.pool(market)?.mark_price())
    }

    // 12.1: swaps route through here so the pools stay privately owned.
    pub fn compute_swap(
        &self,
        market: MarketId,
        params: SwapParams,
    ) -> Result<SwapComputation, OrderBookError> {
        Ok(self.pool(market)?.compute_swap(params)?)
    }

    pub fn apply_swap(
        &mut self,
        market: MarketId,
        computation: &SwapComputation,
    ) -> Result<(), OrderBookError> {
        self.pool_mut(market)?.apply_swap(computation);
        Ok(())
    }

    // 12.2: mint into the pool and merge into the trader's order for the range.
    // accrued fees are claimed first so the checkpoint stays meaningful.
    pub fn add_liquidity(
        &mut self,
        trader: TraderId,
        market: MarketId,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<AddLiquidityOutcome, OrderBookError> {
        let key = (trader, market, lower.value(), upper.value());
        let pool = self.pool_mut(market)?;
        let (base_owed, quote_owed) = pool.mint(lower, upper, liquidity)?;
        let growth_inside = pool.fee_growth_inside(lower, upper);

        let order = self.orders.entry(key).or_insert_with(|| LiquidityOrder {
            trader,
            market,
            tick_lower: lower,
            tick_upper: upper,
            liquidity: Liquidity::zero(),
            fee_growth_inside_checkpoint: growth_inside,
            pending_fee: Decimal::ZERO,
            base_provided: Decimal::ZERO,
            quote_provided: Decimal::ZERO,
        });

        let fees_claimed = order.liquidity.value()
            * (growth_inside - order.fee_growth_inside_checkpoint)
            + order.pending_fee;
        order.fee_growth_inside_checkpoint = growth_inside;
        order.pending_fee = Decimal::ZERO;

        order.liquidity = Liquidity::new_unchecked(order.liquidity.value() + liquidity.value());
        order.base_provided += base_owed;
        order.quote_provided += quote_owed;
        let order_liquidity = order.liquidity;

        Ok(AddLiquidityOutcome {
            base_owed,
            quote_owed,
            fees_claimed,
            order_liquidity,
        })
    }

    // 12.3: burn from the pool. a partial burn releases a proportional share of
    // the maker's principal; whatever the pool returns beyond (or short of) that
    // share is the maker's passive imbalance, reported for the position ledger.
    pub fn remove_liquidity(
        &mut self,
        trader: TraderId,
        market: MarketId,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<RemoveLiquidityOutcome, OrderBookError> {
        let key = (trader, market, lower.value(), upper.value());
        let order = self
            .orders
            .get(&key)
            .ok_or(OrderBookError::OrderNotFound {
                trader,
                market,
                lower: lower.value(),
                upper: upper.value(),
            })?
            .clone();

        let burn_amount = Liquidity::new_unchecked(liquidity.value().min(order.liquidity.value()));

        let pool = self.pool_mut(market)?;
        // growth must be read before the burn: a full burn retires the tick
        // records the inside-growth computation hangs off
        let growth_inside = pool.fee_growth_inside(lower, upper);
        let (base_freed, quote_freed) = pool.burn(lower, upper, burn_amount)?;

        let fees_claimed = order.liquidity.value()
            * (growth_inside - order.fee_growth_inside_checkpoint)
            + order.pending_fee;

        let share = if order.liquidity.is_zero() {
            Decimal::ONE
        } else {
            burn_amount.value() / order.liquidity.value()
        };
        let base_principal = order.base_provided * share;
        let quote_principal = order.quote_provided * share;

        let remaining = order.liquidity.value() - burn_amount.value();
        let order_closed = remaining.is_zero();

        if order_closed {
            self.orders.remove(&key);
        } else {
            let stored = self.orders.get_mut(&key).expect("order fetched above");
            stored.liquidity = Liquidity::new_unchecked(remaining);
            stored.fee_growth_inside_checkpoint = growth_inside;
            stored.pending_fee = Decimal::ZERO;
            stored.base_provided -= base_principal;
            stored.quote_provided -= quote_principal;
        }

        Ok(RemoveLiquidityOutcome {
            base_freed,
            quote_freed,
            base_delta: base_freed - base_principal,
            quote_delta: quote_freed - quote_principal,
            fees_claimed,
            order_closed,
        })
    }

    pub fn order(
        &self,
        trader: TraderId,
        market: MarketId,
        lower: Tick,
        upper: Tick,
    ) -> Option<&LiquidityOrder> {
        self.orders
            .get(&(trader, market, lower.value(), upper.value()))
    }

    pub fn orders_of(&self, trader: TraderId, market: MarketId) -> Vec<&LiquidityOrder> {
        self.orders
            .values()
            .filter(|o| o.trader == trader && o.market == market)
            .collect()
    }

    pub fn orders_in_market(&self, market: MarketId) -> Vec<LiquidityOrder> {
        self.orders
            .values()
            .filter(|o| o.market == market)
            .cloned()
            .collect()
    }

    pub fn has_orders(&self, trader: TraderId, market: MarketId) -> bool {
        self.orders
            .values()
            .any(|o| o.trader == trader && o.market == market)
    }

    pub fn has_any_orders(&self, trader: TraderId) -> bool {
        self.orders.values().any(|o| o.trader == trader)
    }

    // 12.4: pending maker fees = claimed-but-unpaid plus growth since checkpoint.
    pub fn pending_fees(&self, trader: TraderId, market: MarketId) -> Result<Decimal, OrderBookError> {
        let pool = self.pool(market)?;
        let mut total = Decimal::ZERO;
        for order in self.orders_of(trader, market) {
            let growth = pool.fee_growth_inside(order.tick_lower, order.tick_upper);
            total += order.pending_fee
                + order.liquidity.value() * (growth - order.fee_growth_inside_checkpoint);
        }
        Ok(total)
    }

    /// Maker's passive base exposure: what the ranges would return now, minus
    /// what the maker put in. Approximately the negation of taker flow.
    pub fn maker_passive_base(
        &self,
        trader: TraderId,
        market: MarketId,
    ) -> Result<Decimal, OrderBookError> {
        let pool = self.pool(market)?;
        let mut delta = Decimal::ZERO;
        for order in self.orders_of(trader, market) {
            let (base_now, _) =
                pool.amounts_in_range(order.tick_lower, order.tick_upper, order.liquidity)?;
            delta += base_now - order.base_provided;
        }
        Ok(delta)
    }

    /// Quote-denominated size of the maker's open orders, for margin purposes.
    pub fn order_notional(
        &self,
        trader: TraderId,
        market: MarketId,
        mark: Price,
    ) -> Decimal {
        self.orders_of(trader, market)
            .iter()
            .map(|o| o.quote_provided + o.base_provided * mark.value())
            .sum()
    }

    // 12.5: repeg support. the clearing house drives these as one atomic unit.
    pub(crate) fn accrue_order_fees(&mut self, market: MarketId) -> Result<(), OrderBookError> {
        let growths: Vec<(OrderKey, Decimal)> = {
            let pool = self.pool(market)?;
            self.orders
                .values()
                .filter(|o| o.market == market)
                .map(|o| {
                    (
                        o.key(),
                        pool.fee_growth_inside(o.tick_lower, o.tick_upper),
                    )
                })
                .collect()
        };
        for (key, growth) in growths {
            let order = self.orders.get_mut(&key).expect("key from iteration");
            order.pending_fee +=
                order.liquidity.value() * (growth - order.fee_growth_inside_checkpoint);
            order.fee_growth_inside_checkpoint = growth;
        }
        Ok(())
    }

    pub(crate) fn rewrite_order_for_repeg(
        &mut self,
        old_key: OrderKey,
        new_lower: Tick,
        new_upper: Tick,
        new_checkpoint: Decimal,
        base_provided: Decimal,
        quote_provided: Decimal,
    ) {
        if let Some(mut order) = self.orders.remove(&old_key) {
            order.tick_lower = new_lower;
            order.tick_upper = new_upper;
            order.fee_growth_inside_checkpoint = new_checkpoint;
            order.base_provided = base_provided;
            order.quote_provided = quote_provided;
            self.orders.insert(order.key(), order);
        }
    }

    pub(crate) fn recenter_pool(
        &mut self,
        market: MarketId,
        new_price: Price,
    ) -> Result<(), OrderBookError> {
        self.pool_mut(market)?.recenter(new_price)?;
        Ok(())
    }

    pub(crate) fn mint_raw(
        &mut self,
        market: MarketId,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<(Decimal, Decimal), OrderBookError> {
        Ok(self.pool_mut(market)?.mint(lower, upper, liquidity)?)
    }

    pub(crate) fn burn_raw(
        &mut self,
        market: MarketId,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
    ) -> Result<(Decimal, Decimal), OrderBookError> {
        Ok(self.pool_mut(market)?.burn(lower, upper, liquidity)?)
    }
}
