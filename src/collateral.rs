// 10.0: registry of accepted non-settlement collateral. each token carries a
// collateral ratio (haircut for margin purposes), a discount ratio (further
// haircut when force-converted by a liquidator), and a venue-wide deposit cap.

use crate::types::{Ratio, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CollateralError {
    #[error("token {0:?} is not accepted as collateral")]
    UnsupportedCollateralToken(TokenId),

    #[error("token {0:?} is already registered")]
    AlreadyRegistered(TokenId),

    #[error("collateral ratio must be positive")]
    ZeroCollateralRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub token: TokenId,
    /// Margin haircut: value counts as balance * price * collateral_ratio.
    pub collateral_ratio: Ratio,
    /// Additional haircut applied when liquidated for settlement token.
    pub discount_ratio: Ratio,
    /// Max total units of this token the vault will hold, venue-wide.
    pub deposit_cap: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralManager {
    configs: BTreeMap<TokenId, CollateralConfig>,
    pub max_tokens_per_account: usize,
}

impl CollateralManager {
    pub fn new(max_tokens_per_account: usize) -> Self {
        Self {
            configs: BTreeMap::new(),
            max_tokens_per_account,
        }
    }

    pub fn register(&mut self, config: CollateralConfig) -> Result<(), CollateralError> {
        if self.configs.contains_key(&config.token) {
            return Err(CollateralError::AlreadyRegistered(config.token));
        }
        if config.collateral_ratio.value().is_zero() {
            return Err(CollateralError::ZeroCollateralRatio);
        }
        self.configs.insert(config.token, config);
        Ok(())
    }

    pub fn config(&self, token: TokenId) -> Result<&CollateralConfig, CollateralError> {
        self.configs
            .get(&token)
            .ok_or(CollateralError::UnsupportedCollateralToken(token))
    }

    pub fn is_registered(&self, token: TokenId) -> bool {
        self.configs.contains_key(&token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.configs.keys().copied()
    }
}
