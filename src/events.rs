// 15.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists
// all event types.

use crate::types::{BaseAmount, Liquidity, MarketId, Price, Quote, Tick, Timestamp, TokenId, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // collateral events
    Deposited(DepositedEvent),
    Withdrawn(WithdrawnEvent),

    // liquidity events
    LiquidityAdded(LiquidityChangedEvent),
    LiquidityRemoved(LiquidityChangedEvent),

    // position events
    PositionChanged(PositionChangedEvent),
    FundingSettled(FundingSettledEvent),

    // risk events
    PositionLiquidated(PositionLiquidatedEvent),
    CollateralLiquidated(CollateralLiquidatedEvent),
    BadDebtSettled(BadDebtSettledEvent),

    // market events
    Repegged(RepeggedEvent),
    InsuranceFundChanged(InsuranceFundChangedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositedEvent {
    pub trader: TraderId,
    pub token: TokenId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawnEvent {
    pub trader: TraderId,
    pub token: TokenId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityChangedEvent {
    pub trader: TraderId,
    pub market: MarketId,
    pub tick_lower: Tick,
    pub tick_upper: Tick,
    pub liquidity: Liquidity,
    pub base: Decimal,
    pub quote: Decimal,
    pub fees_claimed: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChangedEvent {
    pub trader: TraderId,
    pub market: MarketId,
    pub exchanged_base: Decimal,
    pub exchanged_quote: Decimal,
    pub fee: Quote,
    pub realized_pnl: Quote,
    pub new_size: BaseAmount,
    pub new_open_notional: Quote,
    pub mark_price_after: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettledEvent {
    pub trader: TraderId,
    pub market: MarketId,
    /// Positive = paid by the trader.
    pub payment: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub trader: TraderId,
    pub liquidator: TraderId,
    pub market: MarketId,
    pub closed_pool_size: BaseAmount,
    pub close_price: Price,
    pub penalty: Quote,
    pub liquidator_reward: Quote,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralLiquidatedEvent {
    pub trader: TraderId,
    pub liquidator: TraderId,
    pub token: TokenId,
    pub seized: Decimal,
    pub proceeds: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadDebtSettledEvent {
    pub trader: TraderId,
    pub shortfall: Quote,
    pub covered_by_insurance: Quote,
    pub socialized: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeggedEvent {
    pub market: MarketId,
    pub old_tick: Tick,
    pub new_tick: Tick,
    pub cost: Quote,
    pub multiplier_factor: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceFundChangedEvent {
    pub delta: Quote,
    pub balance_after: Quote,
}
