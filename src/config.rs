// 8.0: venue-level settings in one place. margin ratios, liquidation economics,
// collateral limits, event retention.

use crate::types::TokenId;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Initial margin: required to open or add risk. 0.10 = max 10x.
    pub im_ratio: Decimal,
    /// Maintenance margin: below this a position is liquidatable.
    pub mm_ratio: Decimal,
    /// Penalty on liquidated notional.
    pub liquidation_penalty_ratio: Decimal,
    /// Liquidator's share of the penalty; the rest goes to the insurance fund.
    pub liquidator_reward_share: Decimal,
    /// The token all PnL settles in.
    pub settlement_token: TokenId,
    /// Non-settlement collateral token kinds a single account may hold.
    pub max_collateral_tokens_per_account: usize,
    /// Bounded in-memory audit log.
    pub max_events: usize,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            im_ratio: dec!(0.10),
            mm_ratio: dec!(0.0625),
            liquidation_penalty_ratio: dec!(0.025),
            liquidator_reward_share: dec!(0.5),
            settlement_token: TokenId(0),
            max_collateral_tokens_per_account: 3,
            max_events: 10_000,
        }
    }
}

impl VenueConfig {
    /// Tighter preset for volatile, thin markets: half the leverage, double
    /// the penalty.
    pub fn conservative() -> Self {
        Self {
            im_ratio: dec!(0.20),
            mm_ratio: dec!(0.125),
            liquidation_penalty_ratio: dec!(0.05),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered() {
        let config = VenueConfig::default();
        assert!(config.mm_ratio < config.im_ratio);
        assert!(config.liquidator_reward_share <= Decimal::ONE);
    }

    #[test]
    fn conservative_tightens_margins() {
        let base = VenueConfig::default();
        let tight = VenueConfig::conservative();
        assert!(tight.im_ratio > base.im_ratio);
        assert!(tight.mm_ratio < tight.im_ratio);
    }
}
