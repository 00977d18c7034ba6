// vamm-core: perpetual futures venue on a virtual concentrated-liquidity AMM.
// margin-first architecture: cross-margin math, liquidation, and the insurance
// fund take priority. all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, TraderId, Side, BaseAmount, Tick
//   2.x  tick_math.rs: tick <-> price, range amount math, rounding direction
//   3.x  pool.rs: virtual pool: tick-ranged liquidity, swap walk, fee growth
//   4.x  oracle.rs: index price capability (TWAP window, staleness)
//   5.x  funding.rs: daily funding, side-split time-weighted premium
//   6.x  account_balance.rs: position/PnL ledger, multiplier rebasing
//   7.x  market.rs: market registry + risk params + repeg thresholds
//   8.x  config.rs: venue-level margin/liquidation settings
//   9.x  insurance.rs: insurance fund + per-market repeg funds
//   10.x collateral.rs: non-settlement collateral registry
//   11.x tokens.rs: token capability (mocked, fee-on-transfer detectable)
//   12.x orderbook.rs: liquidity orders, fee checkpoints, maker imbalance
//   13.x vault.rs: balances, account value, collateral liquidation, bad debt
//   14.x exchange.rs: swaps + tick budget, funding sync, repeg execution
//   15.x events.rs: state transition events for audit
//   16.x errors.rs: venue error taxonomy
//   17.x clearing_house.rs: the Venue facade: deadlines, margin, atomicity

// core ledger modules
pub mod account_balance;
pub mod funding;
pub mod pool;
pub mod tick_math;
pub mod types;

// market structure modules
pub mod exchange;
pub mod market;
pub mod orderbook;

// collateral and safety modules
pub mod collateral;
pub mod insurance;
pub mod vault;

// integration modules
pub mod clearing_house;
pub mod config;
pub mod errors;
pub mod events;
pub mod oracle;
pub mod tokens;

// re exports for convenience
pub use account_balance::{AccountBalance, Multipliers, Position, TradeApplication};
pub use clearing_house::{
    LiquidationOutcome, OpenPositionParams, PositionChangeResult, Venue, VenueState,
};
pub use collateral::{CollateralConfig, CollateralError, CollateralManager};
pub use config::VenueConfig;
pub use errors::VenueError;
pub use events::{Event, EventId, EventPayload};
pub use exchange::{Exchange, ExchangeError, RepegOutcome};
pub use funding::{FundingGrowth, FUNDING_PERIOD_SECS};
pub use insurance::InsuranceFund;
pub use market::{Market, MarketError, MarketParams, MarketRegistry, MarketStatus, RepegParams};
pub use oracle::{IndexOracle, OracleError, PriceOracle};
pub use orderbook::{LiquidityOrder, OrderBook, OrderBookError};
pub use pool::{PoolError, SwapComputation, SwapParams, VirtualPool};
pub use tokens::{TokenError, TokenLedger};
pub use types::*;
pub use vault::{Vault, VaultError};
