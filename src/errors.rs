// 16.0: the venue-level error taxonomy. every public operation fails with one
// of these and leaves no state behind; callers should treat all of them as
// non-retryable without changing inputs.

use crate::collateral::CollateralError;
use crate::exchange::ExchangeError;
use crate::market::MarketError;
use crate::orderbook::OrderBookError;
use crate::oracle::OracleError;
use crate::tokens::TokenError;
use crate::types::{MarketId, Timestamp, TraderId};
use crate::vault::VaultError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    #[error("deadline {deadline} elapsed; venue time is {now}")]
    DeadlineExpired { deadline: Timestamp, now: Timestamp },

    #[error("reentrant call rejected")]
    Reentrancy,

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("insufficient margin: account value {account_value} below required {required}")]
    InsufficientMargin {
        account_value: Decimal,
        required: Decimal,
    },

    #[error("insufficient free collateral: requested {requested}, free {free}")]
    InsufficientFreeCollateral { requested: Decimal, free: Decimal },

    #[error("account {0:?} is not liquidatable")]
    NotLiquidatable(TraderId),

    #[error("received {actual}, bound was {bound}")]
    SlippageExceeded { bound: Decimal, actual: Decimal },

    #[error("no position for trader {0:?} in market {1:?}")]
    PositionNotFound(TraderId, MarketId),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    OrderBook(#[from] OrderBookError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Collateral(#[from] CollateralError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}
