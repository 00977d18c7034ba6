// 7.0: market registry. one record per base token: fee tier, insurance-fund cut,
// per-block tick budget, repeg thresholds. created by configuration, mutated by
// risk-parameter updates, never removed while positions exist.

use crate::types::{MarketId, Ratio};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MarketError {
    #[error("market {0:?} not found")]
    MarketNotFound(MarketId),

    #[error("market {0:?} already exists")]
    MarketAlreadyExists(MarketId),

    #[error("market {0:?} is paused")]
    MarketPaused(MarketId),

    #[error("invalid market parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Active,
    Paused,
}

// 7.1: repeg thresholds. the spread must hold continuously for the duration
// before a repeg becomes eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepegParams {
    /// |mark - index| / index beyond which the market counts as over-spread.
    pub max_spread_ratio: Decimal,
    /// How long the spread must persist before repeg is allowed.
    pub min_spread_duration_secs: i64,
}

impl Default for RepegParams {
    fn default() -> Self {
        Self {
            max_spread_ratio: dec!(0.1),
            min_spread_duration_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketParams {
    /// Swap fee charged in quote.
    pub fee_ratio: Ratio,
    /// Share of the swap fee routed to the insurance fund's repeg fund.
    pub insurance_fund_fee_ratio: Ratio,
    /// Tick budget per venue timestamp; the oracle-lag defense.
    pub max_tick_crossed_within_block: i32,
    pub tick_spacing: i32,
    /// Averaging window for index reads used in funding and repeg.
    pub index_twap_window_secs: i64,
    pub repeg: RepegParams,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            fee_ratio: Ratio::new_unchecked(dec!(0.001)),
            insurance_fund_fee_ratio: Ratio::new_unchecked(dec!(0.2)),
            max_tick_crossed_within_block: 1000,
            tick_spacing: 60,
            index_twap_window_secs: 900,
            repeg: RepegParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// Human-readable pair, e.g. "PUNK-ETH".
    pub symbol: String,
    pub params: MarketParams,
    pub status: MarketStatus,
}

impl Market {
    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketRegistry {
    markets: HashMap<MarketId, Market>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: MarketId, symbol: String, params: MarketParams) -> Result<(), MarketError> {
        if self.markets.contains_key(&id) {
            return Err(MarketError::MarketAlreadyExists(id));
        }
        validate_params(&params)?;
        self.markets.insert(
            id,
            Market {
                id,
                symbol,
                params,
                status: MarketStatus::Active,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: MarketId) -> Result<&Market, MarketError> {
        self.markets.get(&id).ok_or(MarketError::MarketNotFound(id))
    }

    pub fn get_active(&self, id: MarketId) -> Result<&Market, MarketError> {
        let market = self.get(id)?;
        if !market.is_active() {
            return Err(MarketError::MarketPaused(id));
        }
        Ok(market)
    }

    pub fn set_status(&mut self, id: MarketId, status: MarketStatus) -> Result<(), MarketError> {
        let market = self
            .markets
            .get_mut(&id)
            .ok_or(MarketError::MarketNotFound(id))?;
        market.status = status;
        Ok(())
    }

    pub fn update_params(
        &mut self,
        id: MarketId,
        params: MarketParams,
    ) -> Result<(), MarketError> {
        validate_params(&params)?;
        let market = self
            .markets
            .get_mut(&id)
            .ok_or(MarketError::MarketNotFound(id))?;
        market.params = params;
        Ok(())
    }

    pub fn ids(&self) -> Vec<MarketId> {
        self.markets.keys().copied().collect()
    }
}

fn validate_params(params: &MarketParams) -> Result<(), MarketError> {
    if params.tick_spacing <= 0 {
        return Err(MarketError::InvalidParameter("tick_spacing must be positive".into()));
    }
    if params.max_tick_crossed_within_block <= 0 {
        return Err(MarketError::InvalidParameter(
            "max_tick_crossed_within_block must be positive".into(),
        ));
    }
    if params.repeg.max_spread_ratio <= Decimal::ZERO {
        return Err(MarketError::InvalidParameter(
            "repeg spread ratio must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_fetch() {
        let mut registry = MarketRegistry::new();
        registry
            .add(MarketId(1), "PUNK-ETH".into(), MarketParams::default())
            .unwrap();

        assert_eq!(registry.get(MarketId(1)).unwrap().symbol, "PUNK-ETH");
        assert!(matches!(
            registry.get(MarketId(9)),
            Err(MarketError::MarketNotFound(_))
        ));
    }

    #[test]
    fn duplicate_market_rejected() {
        let mut registry = MarketRegistry::new();
        registry
            .add(MarketId(1), "PUNK-ETH".into(), MarketParams::default())
            .unwrap();
        assert!(matches!(
            registry.add(MarketId(1), "X".into(), MarketParams::default()),
            Err(MarketError::MarketAlreadyExists(_))
        ));
    }

    #[test]
    fn paused_market_blocks_active_lookup() {
        let mut registry = MarketRegistry::new();
        registry
            .add(MarketId(1), "PUNK-ETH".into(), MarketParams::default())
            .unwrap();
        registry.set_status(MarketId(1), MarketStatus::Paused).unwrap();

        assert!(matches!(
            registry.get_active(MarketId(1)),
            Err(MarketError::MarketPaused(_))
        ));
        assert!(registry.get(MarketId(1)).is_ok());
    }

    #[test]
    fn bad_params_rejected() {
        let mut registry = MarketRegistry::new();
        let params = MarketParams {
            tick_spacing: 0,
            ..MarketParams::default()
        };
        assert!(matches!(
            registry.add(MarketId(1), "X".into(), params),
            Err(MarketError::InvalidParameter(_))
        ));
    }
}
