// 9.0: insurance fund. absorbs realized losses beyond trader collateral and
// bankrolls the per-market repeg funds that subsidize mid-price corrections.
// a repeg fund never goes negative: costs beyond it draw on the main balance.

use crate::types::{MarketId, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub balance: Quote,
    pub total_contributions: Quote,
    pub total_payouts: Quote,
    repeg_funds: HashMap<MarketId, Quote>,
}

impl InsuranceFund {
    pub fn new(initial_balance: Quote) -> Self {
        Self {
            balance: initial_balance,
            total_contributions: initial_balance,
            total_payouts: Quote::zero(),
            repeg_funds: HashMap::new(),
        }
    }

    pub fn contribute(&mut self, amount: Quote) {
        debug_assert!(!amount.is_negative());
        self.balance = self.balance.add(amount);
        self.total_contributions = self.total_contributions.add(amount);
    }

    /// Pays out at most the available balance. Returns what was actually covered.
    pub fn cover(&mut self, amount: Quote) -> Quote {
        debug_assert!(!amount.is_negative());
        let covered = amount.min(self.balance).max(Quote::zero());
        self.balance = self.balance.sub(covered);
        self.total_payouts = self.total_payouts.add(covered);
        covered
    }

    pub fn can_cover(&self, amount: Quote) -> bool {
        self.balance >= amount
    }

    pub fn repeg_fund(&self, market: MarketId) -> Quote {
        self.repeg_funds.get(&market).copied().unwrap_or(Quote::zero())
    }

    /// Swap insurance fees accrue here, earmarked for price corrections.
    pub fn accrue_repeg_fund(&mut self, market: MarketId, amount: Quote) {
        debug_assert!(!amount.is_negative());
        let entry = self.repeg_funds.entry(market).or_insert(Quote::zero());
        *entry = entry.add(amount);
    }

    /// Draw a repeg cost: the earmarked fund first, the main balance for the
    /// remainder. Returns false (and changes nothing) if both together fall short.
    pub fn draw_repeg_cost(&mut self, market: MarketId, cost: Quote) -> bool {
        debug_assert!(!cost.is_negative());
        let fund = self.repeg_fund(market);
        let from_fund = cost.min(fund);
        let from_balance = cost.sub(from_fund);
        if from_balance > self.balance {
            return false;
        }

        let entry = self.repeg_funds.entry(market).or_insert(Quote::zero());
        *entry = entry.sub(from_fund);
        self.balance = self.balance.sub(from_balance);
        if !from_balance.is_zero() {
            self.total_payouts = self.total_payouts.add(from_balance);
        }
        true
    }

    /// A repeg that realizes a gain returns it to the earmarked fund.
    pub fn return_repeg_gain(&mut self, market: MarketId, gain: Quote) {
        debug_assert!(!gain.is_negative());
        self.accrue_repeg_fund(market, gain);
    }

    pub fn total_repeg_funds(&self) -> Quote {
        self.repeg_funds.values().copied().sum()
    }

    /// Everything the fund holds, main balance plus earmarks.
    pub fn total_value(&self) -> Decimal {
        self.balance.value() + self.total_repeg_funds().value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const M: MarketId = MarketId(1);

    #[test]
    fn cover_caps_at_balance() {
        let mut fund = InsuranceFund::new(Quote::new(dec!(100)));

        let covered = fund.cover(Quote::new(dec!(40)));
        assert_eq!(covered.value(), dec!(40));
        assert_eq!(fund.balance.value(), dec!(60));

        let covered = fund.cover(Quote::new(dec!(1000)));
        assert_eq!(covered.value(), dec!(60));
        assert_eq!(fund.balance.value(), dec!(0));
    }

    #[test]
    fn repeg_fund_accrues_and_draws() {
        let mut fund = InsuranceFund::new(Quote::new(dec!(50)));
        fund.accrue_repeg_fund(M, Quote::new(dec!(30)));

        // 30 from the earmark, 10 from the main balance
        assert!(fund.draw_repeg_cost(M, Quote::new(dec!(40))));
        assert_eq!(fund.repeg_fund(M), Quote::zero());
        assert_eq!(fund.balance.value(), dec!(40));
    }

    #[test]
    fn unaffordable_repeg_cost_refused_atomically() {
        let mut fund = InsuranceFund::new(Quote::new(dec!(10)));
        fund.accrue_repeg_fund(M, Quote::new(dec!(5)));

        assert!(!fund.draw_repeg_cost(M, Quote::new(dec!(20))));
        assert_eq!(fund.repeg_fund(M).value(), dec!(5));
        assert_eq!(fund.balance.value(), dec!(10));
    }

    #[test]
    fn repeg_gain_returns_to_fund() {
        let mut fund = InsuranceFund::new(Quote::zero());
        fund.return_repeg_gain(M, Quote::new(dec!(7)));
        assert_eq!(fund.repeg_fund(M).value(), dec!(7));
    }
}
