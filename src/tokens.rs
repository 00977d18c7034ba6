// 11.0: token capability. MOCKED: just balance changes between external wallets
// and the vault, no real transfers. a configurable per-token transfer fee lets
// tests exercise the fee-on-transfer rejection path.

use crate::types::{TokenId, TraderId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TokenError {
    #[error("wallet balance too low: requested {requested}, available {available}")]
    InsufficientWalletBalance { requested: Decimal, available: Decimal },

    #[error("vault holds too little of the token: requested {requested}, available {available}")]
    InsufficientVaultBalance { requested: Decimal, available: Decimal },

    #[error("transfer amount must be positive")]
    NonPositiveAmount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    wallets: HashMap<(TraderId, TokenId), Decimal>,
    vault_held: HashMap<TokenId, Decimal>,
    /// Fraction skimmed on every transfer, keyed by token. Simulates
    /// deflationary tokens; the vault is expected to reject these.
    transfer_fees: HashMap<TokenId, Decimal>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint_to(&mut self, trader: TraderId, token: TokenId, amount: Decimal) {
        *self.wallets.entry((trader, token)).or_insert(Decimal::ZERO) += amount;
    }

    pub fn set_transfer_fee(&mut self, token: TokenId, fee: Decimal) {
        self.transfer_fees.insert(token, fee);
    }

    pub fn wallet_balance(&self, trader: TraderId, token: TokenId) -> Decimal {
        self.wallets
            .get(&(trader, token))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn vault_balance(&self, token: TokenId) -> Decimal {
        self.vault_held.get(&token).copied().unwrap_or(Decimal::ZERO)
    }

    fn fee_of(&self, token: TokenId) -> Decimal {
        self.transfer_fees.get(&token).copied().unwrap_or(Decimal::ZERO)
    }

    /// Moves tokens from a wallet into the vault. Returns the amount the vault
    /// actually received (less than requested for fee-on-transfer tokens).
    pub fn transfer_to_vault(
        &mut self,
        trader: TraderId,
        token: TokenId,
        amount: Decimal,
    ) -> Result<Decimal, TokenError> {
        if amount <= Decimal::ZERO {
            return Err(TokenError::NonPositiveAmount);
        }
        let available = self.wallet_balance(trader, token);
        if available < amount {
            return Err(TokenError::InsufficientWalletBalance {
                requested: amount,
                available,
            });
        }

        let received = amount * (Decimal::ONE - self.fee_of(token));
        *self.wallets.get_mut(&(trader, token)).expect("balance checked") -= amount;
        *self.vault_held.entry(token).or_insert(Decimal::ZERO) += received;
        Ok(received)
    }

    /// Moves tokens out of the vault back to a wallet. Returns what the wallet
    /// received.
    pub fn transfer_from_vault(
        &mut self,
        trader: TraderId,
        token: TokenId,
        amount: Decimal,
    ) -> Result<Decimal, TokenError> {
        if amount <= Decimal::ZERO {
            return Err(TokenError::NonPositiveAmount);
        }
        let held = self.vault_balance(token);
        if held < amount {
            return Err(TokenError::InsufficientVaultBalance {
                requested: amount,
                available: held,
            });
        }

        let received = amount * (Decimal::ONE - self.fee_of(token));
        *self.vault_held.get_mut(&token).expect("balance checked") -= amount;
        *self.wallets.entry((trader, token)).or_insert(Decimal::ZERO) += received;
        Ok(received)
    }
}
