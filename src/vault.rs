// 13.0: the vault. holds every deposited balance, one row per (trader, token);
// the settlement row also absorbs realized PnL and may go negative. free
// collateral and account value are computed here; the clearing house supplies
// the PnL and margin inputs.
//
// deposits verify the amount received equals the amount requested, which is
// what rejects fee-on-transfer tokens.

use crate::collateral::{CollateralError, CollateralManager};
use crate::insurance::InsuranceFund;
use crate::tokens::{TokenError, TokenLedger};
use crate::types::{Price, Quote, TokenId, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VaultError {
    #[error("deposit cap for token {token:?} exceeded: cap {cap}, would hold {would_hold}")]
    DepositCapExceeded {
        token: TokenId,
        cap: Decimal,
        would_hold: Decimal,
    },

    #[error("account already holds the maximum of {max} collateral token kinds")]
    CollateralTokenLimitExceeded { max: usize },

    #[error("token transfer delivered {received}, expected {requested} (fee-on-transfer rejected)")]
    InconsistentTokenBalance { requested: Decimal, received: Decimal },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Decimal, available: Decimal },

    #[error("nothing to seize: trader holds no {0:?}")]
    NoCollateralBalance(TokenId),

    #[error(transparent)]
    Collateral(#[from] CollateralError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    settlement_token: TokenId,
    balances: HashMap<(TraderId, TokenId), Decimal>,
}

impl Vault {
    pub fn new(settlement_token: TokenId) -> Self {
        Self {
            settlement_token,
            balances: HashMap::new(),
        }
    }

    pub fn settlement_token(&self) -> TokenId {
        self.settlement_token
    }

    pub fn balance_of(&self, trader: TraderId, token: TokenId) -> Decimal {
        self.balances
            .get(&(trader, token))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn settlement_balance(&self, trader: TraderId) -> Decimal {
        self.balance_of(trader, self.settlement_token)
    }

    fn credit(&mut self, trader: TraderId, token: TokenId, amount: Decimal) {
        *self.balances.entry((trader, token)).or_insert(Decimal::ZERO) += amount;
    }

    pub fn non_settlement_tokens(&self, trader: TraderId) -> Vec<TokenId> {
        let mut tokens: Vec<TokenId> = self
            .balances
            .iter()
            .filter(|((t, tok), bal)| {
                *t == trader && *tok != self.settlement_token && **bal > Decimal::ZERO
            })
            .map(|((_, tok), _)| *tok)
            .collect();
        tokens.sort();
        tokens
    }

    pub fn total_held(&self, token: TokenId) -> Decimal {
        self.balances
            .iter()
            .filter(|((_, tok), _)| *tok == token)
            .map(|(_, bal)| *bal)
            .sum()
    }

    // 13.1: deposit. cap and token-set checks happen before the transfer; the
    // received-equals-requested check rejects deflationary tokens.
    pub fn deposit(
        &mut self,
        tokens: &mut TokenLedger,
        collateral: &CollateralManager,
        trader: TraderId,
        token: TokenId,
        amount: Decimal,
    ) -> Result<(), VaultError> {
        if token != self.settlement_token {
            let config = collateral.config(token)?;
            let would_hold = self.total_held(token) + amount;
            if would_hold > config.deposit_cap {
                return Err(VaultError::DepositCapExceeded {
                    token,
                    cap: config.deposit_cap,
                    would_hold,
                });
            }
            let holds_already = self.balance_of(trader, token) > Decimal::ZERO;
            if !holds_already
                && self.non_settlement_tokens(trader).len() >= collateral.max_tokens_per_account
            {
                return Err(VaultError::CollateralTokenLimitExceeded {
                    max: collateral.max_tokens_per_account,
                });
            }
        }

        let received = tokens.transfer_to_vault(trader, token, amount)?;
        if received != amount {
            return Err(VaultError::InconsistentTokenBalance {
                requested: amount,
                received,
            });
        }

        self.credit(trader, token, amount);
        Ok(())
    }

    /// Withdraw. The free-collateral gate is the clearing house's job; the vault
    /// only refuses overdrafts.
    pub fn withdraw(
        &mut self,
        tokens: &mut TokenLedger,
        trader: TraderId,
        token: TokenId,
        amount: Decimal,
    ) -> Result<(), VaultError> {
        let available = self.balance_of(trader, token);
        if amount > available {
            return Err(VaultError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        tokens.transfer_from_vault(trader, token, amount)?;
        self.credit(trader, token, -amount);
        Ok(())
    }

    /// Realized PnL settles into the settlement-token row; it may go negative.
    pub fn realize_pnl(&mut self, trader: TraderId, pnl: Quote) {
        self.credit(trader, self.settlement_token, pnl.value());
    }

    // 13.2: account value = settlement balance + (owed + unrealized) PnL
    // + haircut non-settlement collateral.
    pub fn account_value(
        &self,
        trader: TraderId,
        pnl: Quote,
        collateral: &CollateralManager,
        token_prices: &HashMap<TokenId, Price>,
    ) -> Quote {
        let mut value = self.settlement_balance(trader) + pnl.value();
        for token in self.non_settlement_tokens(trader) {
            let Ok(config) = collateral.config(token) else {
                continue;
            };
            let Some(price) = token_prices.get(&token) else {
                continue;
            };
            value +=
                self.balance_of(trader, token) * price.value() * config.collateral_ratio.value();
        }
        Quote::new(value)
    }

    /// Withdrawable amount: account value minus required margin, floored at zero.
    pub fn free_collateral(account_value: Quote, margin_requirement: Quote) -> Quote {
        account_value.sub(margin_requirement).max(Quote::zero())
    }

    // 13.3: forced conversion of non-settlement collateral. the liquidator pays
    // settlement token at a discount and takes the collateral.
    pub fn liquidate_collateral(
        &mut self,
        collateral: &CollateralManager,
        liquidator: TraderId,
        trader: TraderId,
        token: TokenId,
        max_amount: Decimal,
        price: Price,
    ) -> Result<CollateralSeizure, VaultError> {
        let config = collateral.config(token)?;
        let held = self.balance_of(trader, token);
        if held <= Decimal::ZERO {
            return Err(VaultError::NoCollateralBalance(token));
        }

        let seized = max_amount.min(held);
        let proceeds =
            seized * price.value() * (Decimal::ONE - config.discount_ratio.value());

        let liquidator_settlement = self.settlement_balance(liquidator);
        if liquidator_settlement < proceeds {
            return Err(VaultError::InsufficientBalance {
                requested: proceeds,
                available: liquidator_settlement,
            });
        }

        self.credit(liquidator, self.settlement_token, -proceeds);
        self.credit(trader, self.settlement_token, proceeds);
        self.credit(trader, token, -seized);
        self.credit(liquidator, token, seized);

        Ok(CollateralSeizure { seized, proceeds })
    }

    // 13.4: bad debt. the caller has already established the account is out of
    // positions and out of non-settlement collateral; the insurance fund eats
    // the shortfall and the row zeroes. anything the fund cannot cover is
    // reported as socialized.
    pub fn settle_bad_debt(
        &mut self,
        insurance: &mut InsuranceFund,
        trader: TraderId,
    ) -> BadDebtSettlement {
        let balance = self.settlement_balance(trader);
        if balance >= Decimal::ZERO {
            return BadDebtSettlement {
                shortfall: Quote::zero(),
                covered: Quote::zero(),
                socialized: Quote::zero(),
            };
        }

        let shortfall = Quote::new(-balance);
        let covered = insurance.cover(shortfall);
        let socialized = shortfall.sub(covered);

        self.credit(trader, self.settlement_token, shortfall.value());

        BadDebtSettlement {
            shortfall,
            covered,
            socialized,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollateralSeizure {
    pub seized: Decimal,
    pub proceeds: Decimal,
}

#[derive(Debug, Clone)]
pub struct BadDebtSettlement {
    pub shortfall: Quote,
    pub covered: Quote,
    pub socialized: Quote,
}
