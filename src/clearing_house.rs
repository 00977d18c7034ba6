// 17.0: the clearing house. the only public mutation surface; every entry point
// checks the deadline, runs inside a snapshot-and-rollback boundary so a failure
// leaves nothing behind, re-validates margin after the operation, and emits a
// canonical event.
//
// risk-increasing operations (open, add liquidity) are held to the initial
// margin ratio; risk-reducing ones (close, remove) only to maintenance.
//
// oracles sit outside the snapshot: they are read-only collaborators, and their
// readings are taken before the transactional region begins.

use crate::account_balance::AccountBalance;
use crate::collateral::{CollateralConfig, CollateralManager};
use crate::config::VenueConfig;
use crate::errors::VenueError;
use crate::events::*;
use crate::exchange::{Exchange, ExchangeError, RepegOutcome};
use crate::insurance::InsuranceFund;
use crate::market::{MarketParams, MarketRegistry};
use crate::oracle::{IndexOracle, OracleError, PriceOracle};
use crate::orderbook::OrderBook;
use crate::pool::{SwapComputation, SwapParams};
use crate::tokens::TokenLedger;
use crate::types::{
    BaseAmount, Liquidity, MarketId, Price, Quote, Tick, Timestamp, TokenId, TraderId,
};
use crate::vault::Vault;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Below this, a maker's removal imbalance is rounding dust, not a position.
fn dust() -> Decimal {
    dec!(0.000000000001)
}

// 17.0.1: everything the snapshot covers. all of it is plain data, so a failed
// operation restores the whole venue by assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueState {
    pub registry: MarketRegistry,
    pub order_book: OrderBook,
    pub exchange: Exchange,
    pub balances: AccountBalance,
    pub vault: Vault,
    pub collateral: CollateralManager,
    pub insurance: InsuranceFund,
    pub tokens: TokenLedger,
}

#[derive(Debug)]
pub struct Venue {
    config: VenueConfig,
    state: VenueState,
    market_oracles: HashMap<MarketId, IndexOracle>,
    token_oracles: HashMap<TokenId, IndexOracle>,
    events: Vec<Event>,
    next_event_id: u64,
    current_time: Timestamp,
    in_call: bool,
    /// How old the newest oracle observation may be.
    oracle_max_age_secs: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenPositionParams {
    pub trader: TraderId,
    pub market: MarketId,
    pub is_base_to_quote: bool,
    pub is_exact_input: bool,
    pub amount: Decimal,
    /// Slippage bound on the opposite side: minimum received for exact input,
    /// maximum paid for exact output.
    pub opposite_amount_bound: Option<Decimal>,
    pub price_limit: Option<Price>,
    pub deadline: Timestamp,
}

#[derive(Debug, Clone)]
pub struct PositionChangeResult {
    pub exchanged_base: Decimal,
    pub exchanged_quote: Decimal,
    pub fee: Quote,
    pub realized_pnl: Quote,
    pub new_size: BaseAmount,
}

#[derive(Debug, Clone)]
pub struct LiquidationOutcome {
    pub closed_pool_size: BaseAmount,
    pub penalty: Quote,
    pub liquidator_reward: Quote,
    pub realized_pnl: Quote,
    pub bad_debt_settled: Option<Quote>,
}

impl Venue {
    pub fn new(config: VenueConfig) -> Self {
        let settlement = config.settlement_token;
        let max_tokens = config.max_collateral_tokens_per_account;
        Self {
            config,
            state: VenueState {
                registry: MarketRegistry::new(),
                order_book: OrderBook::new(),
                exchange: Exchange::new(),
                balances: AccountBalance::new(),
                vault: Vault::new(settlement),
                collateral: CollateralManager::new(max_tokens),
                insurance: InsuranceFund::new(Quote::zero()),
                tokens: TokenLedger::new(),
            },
            market_oracles: HashMap::new(),
            token_oracles: HashMap::new(),
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_secs(0),
            in_call: false,
            oracle_max_age_secs: 3600,
        }
    }

    // --- time & external feeds -------------------------------------------

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn advance_time(&mut self, secs: i64) {
        self.current_time = Timestamp::from_secs(self.current_time.as_secs() + secs);
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn push_index_price(&mut self, market: MarketId, price: Price) {
        let now = self.current_time;
        self.market_oracles
            .entry(market)
            .or_insert_with(|| IndexOracle::new(3600))
            .push(price, now);
    }

    pub fn push_token_price(&mut self, token: TokenId, price: Price) {
        let now = self.current_time;
        self.token_oracles
            .entry(token)
            .or_insert_with(|| IndexOracle::new(3600))
            .push(price, now);
    }

    // --- administration ----------------------------------------------------

    pub fn add_market(
        &mut self,
        id: MarketId,
        symbol: &str,
        params: MarketParams,
        initial_index_price: Price,
    ) -> Result<(), VenueError> {
        let fee_ratio = params.fee_ratio;
        let if_share = params.insurance_fund_fee_ratio;
        let spacing = params.tick_spacing;
        self.state.registry.add(id, symbol.to_string(), params)?;
        self.state
            .order_book
            .create_pool(id, initial_index_price, fee_ratio, if_share, spacing)?;
        self.state.exchange.init_market(id, self.current_time);
        self.market_oracles.insert(
            id,
            IndexOracle::with_price(initial_index_price, self.current_time, self.oracle_max_age_secs),
        );
        Ok(())
    }

    pub fn register_collateral(
        &mut self,
        config: CollateralConfig,
        initial_price: Price,
    ) -> Result<(), VenueError> {
        let token = config.token;
        self.state.collateral.register(config)?;
        self.token_oracles.insert(
            token,
            IndexOracle::with_price(initial_price, self.current_time, self.oracle_max_age_secs),
        );
        Ok(())
    }

    pub fn pause_market(&mut self, market: MarketId) -> Result<(), VenueError> {
        Ok(self
            .state
            .registry
            .set_status(market, crate::market::MarketStatus::Paused)?)
    }

    pub fn resume_market(&mut self, market: MarketId) -> Result<(), VenueError> {
        Ok(self
            .state
            .registry
            .set_status(market, crate::market::MarketStatus::Active)?)
    }

    /// Risk-parameter update; validation lives in the registry.
    pub fn update_market_params(
        &mut self,
        market: MarketId,
        params: MarketParams,
    ) -> Result<(), VenueError> {
        Ok(self.state.registry.update_params(market, params)?)
    }

    pub fn fund_insurance(&mut self, amount: Quote) {
        self.state.insurance.contribute(amount);
    }

    /// External wallets are minted out-of-band; the sim and tests use this.
    pub fn mint_wallet(&mut self, trader: TraderId, token: TokenId, amount: Decimal) {
        self.state.tokens.mint_to(trader, token, amount);
    }

    pub fn set_transfer_fee(&mut self, token: TokenId, fee: Decimal) {
        self.state.tokens.set_transfer_fee(token, fee);
    }

    // --- collateral ---------------------------------------------------------

    pub fn deposit(
        &mut self,
        trader: TraderId,
        token: TokenId,
        amount: Decimal,
    ) -> Result<(), VenueError> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::ZeroAmount);
        }
        self.transact(|state| {
            state
                .vault
                .deposit(&mut state.tokens, &state.collateral, trader, token, amount)?;
            Ok(())
        })?;
        self.emit(EventPayload::Deposited(DepositedEvent {
            trader,
            token,
            amount,
        }));
        Ok(())
    }

    pub fn withdraw(
        &mut self,
        trader: TraderId,
        token: TokenId,
        amount: Decimal,
    ) -> Result<(), VenueError> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::ZeroAmount);
        }
        let now = self.current_time;
        let settlement = self.config.settlement_token;
        let token_prices = self.collateral_prices(trader)?;
        let indexes = self.index_prices_for_trader(trader)?;
        let im_ratio = self.config.im_ratio;

        // value the withdrawal in settlement terms for the free-collateral gate
        let requested_value = if token == settlement {
            amount
        } else {
            let config = self.state.collateral.config(token)?;
            let price = self.spot_token_price(token)?;
            amount * price.value() * config.collateral_ratio.value()
        };

        self.transact(|state| {
            // realize pending funding so the margin picture is current
            settle_all_funding(state, trader, &indexes, now);
            if token == settlement {
                let owed = state.balances.take_owed_realized_pnl(trader);
                state.vault.realize_pnl(trader, owed);
            }

            let free = free_collateral_inner(state, trader, &token_prices, im_ratio);
            if requested_value > free.value() {
                return Err(VenueError::InsufficientFreeCollateral {
                    requested: requested_value,
                    free: free.value(),
                });
            }

            state.vault.withdraw(&mut state.tokens, trader, token, amount)?;
            Ok(())
        })?;
        self.emit(EventPayload::Withdrawn(WithdrawnEvent {
            trader,
            token,
            amount,
        }));
        Ok(())
    }

    // --- liquidity -----------------------------------------------------------

    pub fn add_liquidity(
        &mut self,
        trader: TraderId,
        market: MarketId,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
        deadline: Timestamp,
    ) -> Result<(), VenueError> {
        self.check_deadline(deadline)?;
        if liquidity.is_zero() {
            return Err(VenueError::ZeroAmount);
        }
        self.state.registry.get_active(market)?;
        let now = self.current_time;
        let index = self.index_price(market)?;
        let token_prices = self.collateral_prices(trader)?;
        let im_ratio = self.config.im_ratio;
        let repeg_params = self.state.registry.get(market)?.params.repeg.clone();

        let outcome = self.transact(|state| {
            let growth = touch_market(state, market, index, now);
            state.balances.settle_funding(trader, market, &growth);

            let outcome = state
                .order_book
                .add_liquidity(trader, market, lower, upper, liquidity)?;
            if !outcome.fees_claimed.is_zero() {
                state
                    .balances
                    .add_owed_realized_pnl(trader, Quote::new(outcome.fees_claimed));
            }

            check_margin(state, trader, &token_prices, im_ratio)?;

            let mark = state.order_book.mark_price(market)?;
            state
                .exchange
                .update_spread_state(market, mark, index, &repeg_params, now);
            Ok(outcome)
        })?;

        self.emit(EventPayload::LiquidityAdded(LiquidityChangedEvent {
            trader,
            market,
            tick_lower: lower,
            tick_upper: upper,
            liquidity,
            base: outcome.base_owed,
            quote: outcome.quote_owed,
            fees_claimed: outcome.fees_claimed,
        }));
        Ok(())
    }

    pub fn remove_liquidity(
        &mut self,
        trader: TraderId,
        market: MarketId,
        lower: Tick,
        upper: Tick,
        liquidity: Liquidity,
        deadline: Timestamp,
    ) -> Result<(), VenueError> {
        self.check_deadline(deadline)?;
        if liquidity.is_zero() {
            return Err(VenueError::ZeroAmount);
        }
        self.state.registry.get_active(market)?;
        let now = self.current_time;
        let index = self.index_price(market)?;
        let token_prices = self.collateral_prices(trader)?;
        let mm_ratio = self.config.mm_ratio;
        let repeg_params = self.state.registry.get(market)?.params.repeg.clone();

        let outcome = self.transact(|state| {
            let growth = touch_market(state, market, index, now);
            state.balances.settle_funding(trader, market, &growth);

            let outcome = state
                .order_book
                .remove_liquidity(trader, market, lower, upper, liquidity)?;
            if !outcome.fees_claimed.is_zero() {
                state
                    .balances
                    .add_owed_realized_pnl(trader, Quote::new(outcome.fees_claimed));
            }

            // the maker's inventory imbalance becomes a taker position; pure
            // rounding dust settles straight into owed PnL instead
            if outcome.base_delta.abs() > dust() {
                state.balances.apply_trade(
                    trader,
                    market,
                    outcome.base_delta,
                    Quote::new(outcome.quote_delta),
                    &growth,
                );
            } else if !outcome.quote_delta.is_zero() {
                state
                    .balances
                    .add_owed_realized_pnl(trader, Quote::new(outcome.quote_delta));
            }

            // removing is risk-reducing: maintenance margin only
            check_margin(state, trader, &token_prices, mm_ratio)?;

            let mark = state.order_book.mark_price(market)?;
            state
                .exchange
                .update_spread_state(market, mark, index, &repeg_params, now);
            Ok(outcome)
        })?;

        self.emit(EventPayload::LiquidityRemoved(LiquidityChangedEvent {
            trader,
            market,
            tick_lower: lower,
            tick_upper: upper,
            liquidity,
            base: outcome.base_freed,
            quote: outcome.quote_freed,
            fees_claimed: outcome.fees_claimed,
        }));
        Ok(())
    }

    // --- trading ---------------------------------------------------------------

    pub fn open_position(
        &mut self,
        params: OpenPositionParams,
    ) -> Result<PositionChangeResult, VenueError> {
        self.check_deadline(params.deadline)?;
        if params.amount <= Decimal::ZERO {
            return Err(VenueError::ZeroAmount);
        }
        let market = params.market;
        self.state.registry.get_active(market)?;
        let now = self.current_time;
        let index = self.index_price(market)?;
        let token_prices = self.collateral_prices(params.trader)?;
        let market_params = self.state.registry.get(market)?.params.clone();
        let im_ratio = self.config.im_ratio;
        let mm_ratio = self.config.mm_ratio;

        let (result, mark_after) = self.transact(|state| {
            let growth = touch_market(state, market, index, now);
            state.balances.settle_funding(params.trader, market, &growth);

            let old_abs = state.balances.pool_size(params.trader, market).abs();

            let swap_params = SwapParams {
                is_base_to_quote: params.is_base_to_quote,
                is_exact_input: params.is_exact_input,
                amount: params.amount,
                sqrt_price_limit: params.price_limit.and_then(|p| p.value().sqrt()),
            };
            let comp = state.exchange.swap(
                &mut state.order_book,
                market,
                swap_params,
                market_params.max_tick_crossed_within_block,
                now,
            )?;

            check_slippage(&params, &comp)?;

            let app = state.balances.apply_trade(
                params.trader,
                market,
                comp.exchanged_base,
                Quote::new(comp.exchanged_quote),
                &growth,
            );

            state
                .insurance
                .accrue_repeg_fund(market, Quote::new(comp.insurance_fee));

            let new_abs = state.balances.pool_size(params.trader, market).abs();
            let ratio = if new_abs > old_abs { im_ratio } else { mm_ratio };
            check_margin(state, params.trader, &token_prices, ratio)?;

            let mark = state.order_book.mark_price(market)?;
            state
                .exchange
                .update_spread_state(market, mark, index, &market_params.repeg, now);

            Ok((
                PositionChangeResult {
                    exchanged_base: comp.exchanged_base,
                    exchanged_quote: comp.exchanged_quote,
                    fee: Quote::new(comp.fee),
                    realized_pnl: app.realized_pnl,
                    new_size: app.new_size,
                },
                mark,
            ))
        })?;

        self.emit(EventPayload::PositionChanged(PositionChangedEvent {
            trader: params.trader,
            market,
            exchanged_base: result.exchanged_base,
            exchanged_quote: result.exchanged_quote,
            fee: result.fee,
            realized_pnl: result.realized_pnl,
            new_size: result.new_size,
            new_open_notional: self
                .state
                .balances
                .position(params.trader, market)
                .map(|p| p.open_notional)
                .unwrap_or(Quote::zero()),
            mark_price_after: mark_after,
        }));
        Ok(result)
    }

    pub fn close_position(
        &mut self,
        trader: TraderId,
        market: MarketId,
        price_limit: Option<Price>,
        deadline: Timestamp,
    ) -> Result<PositionChangeResult, VenueError> {
        let pool_size = self.state.balances.pool_size(trader, market);
        if pool_size.is_zero() {
            return Err(VenueError::PositionNotFound(trader, market));
        }

        // closing a long sells the base; closing a short buys it back exactly
        let params = OpenPositionParams {
            trader,
            market,
            is_base_to_quote: pool_size.is_long(),
            is_exact_input: pool_size.is_long(),
            amount: pool_size.abs(),
            opposite_amount_bound: None,
            price_limit,
            deadline,
        };
        self.open_position(params)
    }

    pub fn settle_funding(&mut self, trader: TraderId, market: MarketId) -> Result<Quote, VenueError> {
        self.state.registry.get(market)?;
        let now = self.current_time;
        let index = self.index_price(market)?;

        let payment = self.transact(|state| {
            let growth = touch_market(state, market, index, now);
            Ok(state.balances.settle_funding(trader, market, &growth))
        })?;

        self.emit(EventPayload::FundingSettled(FundingSettledEvent {
            trader,
            market,
            payment,
        }));
        Ok(payment)
    }

    // --- liquidation -------------------------------------------------------------

    pub fn liquidate(
        &mut self,
        liquidator: TraderId,
        trader: TraderId,
        market: MarketId,
        max_close_base: Option<Decimal>,
    ) -> Result<LiquidationOutcome, VenueError> {
        self.state.registry.get_active(market)?;
        let now = self.current_time;
        let index = self.index_price(market)?;
        let token_prices = self.collateral_prices(trader)?;
        let market_params = self.state.registry.get(market)?.params.clone();
        let config = self.config.clone();

        let outcome = self.transact(|state| {
            let growth = touch_market(state, market, index, now);
            state.balances.settle_funding(trader, market, &growth);

            // gate: maintenance margin must be breached
            let account_value = account_value_inner(state, trader, &token_prices);
            let maintenance = margin_requirement_inner(state, trader, config.mm_ratio);
            if account_value >= maintenance {
                return Err(VenueError::NotLiquidatable(trader));
            }

            let pool_size = state.balances.pool_size(trader, market);
            if pool_size.is_zero() {
                return Err(VenueError::PositionNotFound(trader, market));
            }

            let close = max_close_base
                .map(|m| m.abs().min(pool_size.abs()))
                .unwrap_or(pool_size.abs());

            // forced taker close at the current pool price
            let swap_params = SwapParams {
                is_base_to_quote: pool_size.is_long(),
                is_exact_input: pool_size.is_long(),
                amount: close,
                sqrt_price_limit: None,
            };
            let comp = state.exchange.swap(
                &mut state.order_book,
                market,
                swap_params,
                market_params.max_tick_crossed_within_block,
                now,
            )?;

            let app = state.balances.apply_trade(
                trader,
                market,
                comp.exchanged_base,
                Quote::new(comp.exchanged_quote),
                &growth,
            );
            state
                .insurance
                .accrue_repeg_fund(market, Quote::new(comp.insurance_fee));

            // penalty on the closed notional, split liquidator / insurance
            let closed_notional = comp.exchanged_quote.abs();
            let penalty = Quote::new(closed_notional * config.liquidation_penalty_ratio);
            let reward = penalty.mul(config.liquidator_reward_share);
            state.balances.add_owed_realized_pnl(trader, penalty.negate());
            state.balances.add_owed_realized_pnl(liquidator, reward);
            state.insurance.contribute(penalty.sub(reward));

            // settle the trader's ledger into the vault so the bad-debt check
            // sees the final picture
            let owed = state.balances.take_owed_realized_pnl(trader);
            state.vault.realize_pnl(trader, owed);

            let bad_debt = maybe_settle_bad_debt(state, trader);

            let outcome = LiquidationOutcome {
                closed_pool_size: BaseAmount::new(comp.exchanged_base),
                penalty,
                liquidator_reward: reward,
                realized_pnl: app.realized_pnl,
                bad_debt_settled: bad_debt.map(|b| b.0),
            };
            Ok((outcome, bad_debt))
        })?;
        let (outcome, bad_debt) = outcome;

        let close_price = self.state.order_book.mark_price(market)?;
        self.emit(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            trader,
            liquidator,
            market,
            closed_pool_size: outcome.closed_pool_size,
            close_price,
            penalty: outcome.penalty,
            liquidator_reward: outcome.liquidator_reward,
            realized_pnl: outcome.realized_pnl,
        }));
        if let Some((shortfall, covered, socialized)) = bad_debt {
            self.emit(EventPayload::BadDebtSettled(BadDebtSettledEvent {
                trader,
                shortfall,
                covered_by_insurance: covered,
                socialized,
            }));
        }
        Ok(outcome)
    }

    pub fn liquidate_collateral(
        &mut self,
        liquidator: TraderId,
        trader: TraderId,
        token: TokenId,
        max_amount: Decimal,
    ) -> Result<(), VenueError> {
        if max_amount <= Decimal::ZERO {
            return Err(VenueError::ZeroAmount);
        }
        let price = self.spot_token_price(token)?;

        let seizure = self.transact(|state| {
            // only for accounts that are out of positions but still in deficit
            if state.balances.has_open_positions(trader) || state.order_book.has_any_orders(trader) {
                return Err(VenueError::NotLiquidatable(trader));
            }
            let owed = state.balances.take_owed_realized_pnl(trader);
            state.vault.realize_pnl(trader, owed);
            if state.vault.settlement_balance(trader) >= Decimal::ZERO {
                return Err(VenueError::NotLiquidatable(trader));
            }

            let seizure = state.vault.liquidate_collateral(
                &state.collateral,
                liquidator,
                trader,
                token,
                max_amount,
                price,
            )?;
            Ok(seizure)
        })?;

        self.emit(EventPayload::CollateralLiquidated(CollateralLiquidatedEvent {
            trader,
            liquidator,
            token,
            seized: seizure.seized,
            proceeds: seizure.proceeds,
        }));

        // with the last collateral gone, any remaining deficit is bad debt
        let bad_debt = self.transact(|state| Ok(maybe_settle_bad_debt(state, trader)))?;
        if let Some((shortfall, covered, socialized)) = bad_debt {
            self.emit(EventPayload::BadDebtSettled(BadDebtSettledEvent {
                trader,
                shortfall,
                covered_by_insurance: covered,
                socialized,
            }));
        }
        Ok(())
    }

    // --- repeg ----------------------------------------------------------------

    pub fn repeg(&mut self, market: MarketId) -> Result<RepegOutcome, VenueError> {
        self.state.registry.get_active(market)?;
        let now = self.current_time;
        let index = self.index_price(market)?;
        let repeg_params = self.state.registry.get(market)?.params.repeg.clone();

        // the spread clock runs outside the transactional region: an ineligible
        // attempt must not roll it back, and must not touch funding or orders
        let mark = self.state.order_book.mark_price(market)?;
        self.state
            .exchange
            .update_spread_state(market, mark, index, &repeg_params, now);
        if !self.state.exchange.is_able_repeg(market, &repeg_params, now) {
            return Err(VenueError::Exchange(ExchangeError::RepegNotEligible));
        }

        let outcome = self.transact(|state| {
            // a repeg is a touch: settle the premium integral up to now first
            touch_market(state, market, index, now);
            let outcome = state.exchange.execute_repeg(
                &mut state.order_book,
                &mut state.balances,
                &mut state.insurance,
                market,
                index,
                now,
            )?;
            Ok(outcome)
        })?;

        self.emit(EventPayload::Repegged(RepeggedEvent {
            market,
            old_tick: outcome.old_tick,
            new_tick: outcome.new_tick,
            cost: outcome.cost,
            multiplier_factor: outcome.multiplier_factor,
        }));
        Ok(outcome)
    }

    // --- queries ----------------------------------------------------------------

    pub fn estimate_swap(
        &self,
        market: MarketId,
        is_base_to_quote: bool,
        is_exact_input: bool,
        amount: Decimal,
        price_limit: Option<Price>,
    ) -> Result<SwapComputation, VenueError> {
        let params = SwapParams {
            is_base_to_quote,
            is_exact_input,
            amount,
            sqrt_price_limit: price_limit.and_then(|p| p.value().sqrt()),
        };
        Ok(self
            .state
            .exchange
            .estimate_swap(&self.state.order_book, market, params)?)
    }

    pub fn mark_price(&self, market: MarketId) -> Result<Price, VenueError> {
        Ok(self.state.order_book.mark_price(market)?)
    }

    pub fn index_price(&self, market: MarketId) -> Result<Price, VenueError> {
        let params = &self.state.registry.get(market)?.params;
        let oracle = self
            .market_oracles
            .get(&market)
            .ok_or(OracleError::NoPriceAvailable)?;
        Ok(oracle.get_index_price(params.index_twap_window_secs, self.current_time)?)
    }

    pub fn account_value(&self, trader: TraderId) -> Result<Quote, VenueError> {
        let token_prices = self.collateral_prices(trader)?;
        Ok(account_value_inner(&self.state, trader, &token_prices))
    }

    pub fn free_collateral(&self, trader: TraderId) -> Result<Quote, VenueError> {
        let token_prices = self.collateral_prices(trader)?;
        Ok(free_collateral_inner(
            &self.state,
            trader,
            &token_prices,
            self.config.im_ratio,
        ))
    }

    /// Account value over total position notional; None with no exposure.
    pub fn margin_ratio(&self, trader: TraderId) -> Result<Option<Decimal>, VenueError> {
        let token_prices = self.collateral_prices(trader)?;
        let value = account_value_inner(&self.state, trader, &token_prices);
        let notional = margin_requirement_inner(&self.state, trader, Decimal::ONE);
        if notional.is_zero() {
            return Ok(None);
        }
        Ok(Some(value.value() / notional.value()))
    }

    /// (owed realized PnL, unrealized PnL, pending maker fees).
    pub fn pnl_and_pending_fee(
        &self,
        trader: TraderId,
    ) -> Result<(Quote, Quote, Decimal), VenueError> {
        let owed = self.state.balances.owed_realized_pnl(trader);
        let marks = marks_of(&self.state);
        let unrealized = self.state.balances.total_unrealized_pnl(trader, &marks);
        let mut pending_fee = Decimal::ZERO;
        for market in self.state.registry.ids() {
            pending_fee += self.state.order_book.pending_fees(trader, market)?;
        }
        Ok((owed, unrealized, pending_fee))
    }

    pub fn pending_funding(&self, trader: TraderId, market: MarketId) -> Result<Quote, VenueError> {
        let index = self.index_price(market)?;
        let mark = self.state.order_book.mark_price(market)?;
        let (long_oi, short_oi) = self.state.balances.open_interest(market);
        let growth = self.state.exchange.funding_growth(market, self.current_time);
        let synced = crate::funding::accrue_premium(
            &growth,
            mark,
            index,
            long_oi,
            short_oi,
            self.current_time,
        );
        Ok(self.state.balances.pending_funding(trader, market, &synced))
    }

    pub fn position(&self, trader: TraderId, market: MarketId) -> Option<&crate::account_balance::Position> {
        self.state.balances.position(trader, market)
    }

    pub fn maker_passive_base(&self, trader: TraderId, market: MarketId) -> Result<Decimal, VenueError> {
        Ok(self.state.order_book.maker_passive_base(trader, market)?)
    }

    pub fn insurance_fund_balance(&self) -> Quote {
        self.state.insurance.balance
    }

    pub fn repeg_fund(&self, market: MarketId) -> Quote {
        self.state.insurance.repeg_fund(market)
    }

    pub fn vault_balance(&self, trader: TraderId, token: TokenId) -> Decimal {
        self.state.vault.balance_of(trader, token)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn state(&self) -> &VenueState {
        &self.state
    }

    // --- internals -----------------------------------------------------------

    fn check_deadline(&self, deadline: Timestamp) -> Result<(), VenueError> {
        if deadline < self.current_time {
            return Err(VenueError::DeadlineExpired {
                deadline,
                now: self.current_time,
            });
        }
        Ok(())
    }

    // 17.1: the transactional boundary. a failed operation restores the
    // snapshot, so every public entry point is all-or-nothing.
    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut VenueState) -> Result<T, VenueError>,
    ) -> Result<T, VenueError> {
        if self.in_call {
            return Err(VenueError::Reentrancy);
        }
        self.in_call = true;
        let snapshot = self.state.clone();
        let result = f(&mut self.state);
        if result.is_err() {
            self.state = snapshot;
        }
        self.in_call = false;
        result
    }

    fn emit(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;
        tracing::debug!(id = event.id.0, at = event.timestamp.as_secs(), payload = ?event.payload, "event");
        self.events.push(event);
        if self.events.len() > self.config.max_events {
            let drain = self.events.len() - self.config.max_events;
            self.events.drain(0..drain);
        }
    }

    fn spot_token_price(&self, token: TokenId) -> Result<Price, VenueError> {
        let oracle = self
            .token_oracles
            .get(&token)
            .ok_or(OracleError::NoPriceAvailable)?;
        Ok(oracle.get_index_price(0, self.current_time)?)
    }

    /// Spot prices for every non-settlement token the trader holds.
    fn collateral_prices(&self, trader: TraderId) -> Result<HashMap<TokenId, Price>, VenueError> {
        let mut prices = HashMap::new();
        for token in self.state.vault.non_settlement_tokens(trader) {
            prices.insert(token, self.spot_token_price(token)?);
        }
        Ok(prices)
    }

    /// Index prices for every market the trader has a position in.
    fn index_prices_for_trader(
        &self,
        trader: TraderId,
    ) -> Result<HashMap<MarketId, Price>, VenueError> {
        let mut prices = HashMap::new();
        for market in self.state.balances.markets_of(trader) {
            prices.insert(market, self.index_price(market)?);
        }
        Ok(prices)
    }
}

// --- free helpers usable inside the transactional closure ----------------------

fn marks_of(state: &VenueState) -> HashMap<MarketId, Price> {
    let mut marks = HashMap::new();
    for id in state.registry.ids() {
        if let Ok(mark) = state.order_book.mark_price(id) {
            marks.insert(id, mark);
        }
    }
    marks
}

/// Sync the market's funding growth: the lazy "touched" hook.
fn touch_market(
    state: &mut VenueState,
    market: MarketId,
    index: Price,
    now: Timestamp,
) -> crate::funding::FundingGrowth {
    let mark = state
        .order_book
        .mark_price(market)
        .unwrap_or(index);
    let (long_oi, short_oi) = state.balances.open_interest(market);
    state
        .exchange
        .sync_funding(market, mark, index, long_oi, short_oi, now)
}

fn settle_all_funding(
    state: &mut VenueState,
    trader: TraderId,
    indexes: &HashMap<MarketId, Price>,
    now: Timestamp,
) {
    for (market, index) in indexes {
        let growth = touch_market(state, *market, *index, now);
        state.balances.settle_funding(trader, *market, &growth);
    }
}

fn account_value_inner(
    state: &VenueState,
    trader: TraderId,
    token_prices: &HashMap<TokenId, Price>,
) -> Quote {
    let owed = state.balances.owed_realized_pnl(trader);
    let marks = marks_of(state);
    let unrealized = state.balances.total_unrealized_pnl(trader, &marks);
    state
        .vault
        .account_value(trader, owed.add(unrealized), &state.collateral, token_prices)
}

/// Margin requirement at the given ratio: taker notional plus maker open-order
/// notional, across every market.
fn margin_requirement_inner(state: &VenueState, trader: TraderId, ratio: Decimal) -> Quote {
    let marks = marks_of(state);
    let taker = state.balances.margin_requirement(trader, &marks, ratio);
    let mut maker = Decimal::ZERO;
    for (market, mark) in &marks {
        maker += state.order_book.order_notional(trader, *market, *mark);
    }
    taker.add(Quote::new(maker * ratio))
}

fn free_collateral_inner(
    state: &VenueState,
    trader: TraderId,
    token_prices: &HashMap<TokenId, Price>,
    im_ratio: Decimal,
) -> Quote {
    let value = account_value_inner(state, trader, token_prices);
    let requirement = margin_requirement_inner(state, trader, im_ratio);
    Vault::free_collateral(value, requirement)
}

fn check_margin(
    state: &VenueState,
    trader: TraderId,
    token_prices: &HashMap<TokenId, Price>,
    ratio: Decimal,
) -> Result<(), VenueError> {
    let value = account_value_inner(state, trader, token_prices);
    let required = margin_requirement_inner(state, trader, ratio);
    if value < required {
        return Err(VenueError::InsufficientMargin {
            account_value: value.value(),
            required: required.value(),
        });
    }
    Ok(())
}

fn check_slippage(
    params: &OpenPositionParams,
    comp: &SwapComputation,
) -> Result<(), VenueError> {
    let Some(bound) = params.opposite_amount_bound else {
        return Ok(());
    };
    if params.is_exact_input {
        // received on the opposite side must reach the bound
        let received = if params.is_base_to_quote {
            comp.exchanged_quote
        } else {
            comp.exchanged_base
        };
        if received < bound {
            return Err(VenueError::SlippageExceeded {
                bound,
                actual: received,
            });
        }
    } else {
        // paid on the opposite side must not exceed the bound
        let paid = if params.is_base_to_quote {
            -comp.exchanged_base
        } else {
            -comp.exchanged_quote
        };
        if paid > bound {
            return Err(VenueError::SlippageExceeded { bound, actual: paid });
        }
    }
    Ok(())
}

/// If the account is fully degenerate (negative settlement value, no positions,
/// no orders, no remaining non-settlement collateral) the insurance fund eats
/// the shortfall. Returns (shortfall, covered, socialized).
fn maybe_settle_bad_debt(
    state: &mut VenueState,
    trader: TraderId,
) -> Option<(Quote, Quote, Quote)> {
    if state.balances.has_open_positions(trader)
        || state.order_book.has_any_orders(trader)
        || !state.vault.non_settlement_tokens(trader).is_empty()
        || state.vault.settlement_balance(trader) >= Decimal::ZERO
    {
        return None;
    }
    let settlement = state.vault.settle_bad_debt(&mut state.insurance, trader);
    Some((
        settlement.shortfall,
        settlement.covered,
        settlement.socialized,
    ))
}
