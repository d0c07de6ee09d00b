//! Account, token and payout bookkeeping around the block pipeline.
//!
//! Token custody, lending and fee distribution live outside the engine. The
//! engine only tracks which L1 address owns which account id, which tokens
//! exist, and how much each address may pull out. Loan and fee effects are
//! handed to the [`LoanLedger`] and [`FeeSink`] collaborators.

use std::collections::BTreeMap;
use std::sync::Mutex;

use rollup_core::{AccountId, Address, LoanSettlement, TokenId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RollupError;

/// Pull-payment balances, in base-ledger units, keyed by `(address, token)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBalances {
    balances: BTreeMap<(Address, TokenId), u128>,
}

impl PendingBalances {
    pub fn get(&self, address: &Address, token_id: TokenId) -> u128 {
        self.balances
            .get(&(*address, token_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn credit(&mut self, address: Address, token_id: TokenId, amount: u128) {
        let entry = self.balances.entry((address, token_id)).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Check that `amount` can be debited, without debiting it.
    pub fn check_debit(
        &self,
        address: &Address,
        token_id: TokenId,
        amount: u128,
    ) -> Result<(), RollupError> {
        let available = self.get(address, token_id);
        if available < amount {
            return Err(RollupError::InsufficientPendingBalance {
                available,
                requested: amount,
            });
        }
        Ok(())
    }

    pub fn debit(
        &mut self,
        address: &Address,
        token_id: TokenId,
        amount: u128,
    ) -> Result<(), RollupError> {
        self.check_debit(address, token_id, amount)?;
        let key = (*address, token_id);
        let remaining = self.get(address, token_id) - amount;
        if remaining == 0 {
            self.balances.remove(&key);
        } else {
            self.balances.insert(key, remaining);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(Address, TokenId), &u128)> {
        self.balances.iter()
    }
}

/// L1 address <-> L2 account id bindings. Ids start at 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistry {
    by_id: BTreeMap<AccountId, Address>,
    by_address: BTreeMap<Address, AccountId>,
    next_id: AccountId,
}

impl AccountRegistry {
    pub fn account_of(&self, address: &Address) -> Option<AccountId> {
        self.by_address.get(address).copied()
    }

    pub fn address_of(&self, account_id: AccountId) -> Option<Address> {
        self.by_id.get(&account_id).copied()
    }

    pub fn require_address(&self, account_id: AccountId) -> Result<Address, RollupError> {
        self.address_of(account_id)
            .ok_or(RollupError::UnknownAccount { account_id })
    }

    /// Id the next registration will receive.
    pub fn next_id(&self) -> AccountId {
        self.next_id.max(1)
    }

    /// Bind `address` to the next account id.
    pub fn allocate(&mut self, address: Address) -> Result<AccountId, RollupError> {
        if self.by_address.contains_key(&address) {
            return Err(RollupError::AlreadyRegistered { address });
        }
        let id = self.next_id();
        let next_id = id.checked_add(1).ok_or(RollupError::AccountsExhausted)?;
        self.by_id.insert(id, address);
        self.by_address.insert(address, id);
        self.next_id = next_id;
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// A token known to the rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: TokenId,
    pub l1_address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegistry {
    tokens: BTreeMap<TokenId, TokenInfo>,
}

impl TokenRegistry {
    pub fn new(tokens: impl IntoIterator<Item = TokenInfo>) -> Self {
        Self {
            tokens: tokens.into_iter().map(|t| (t.token_id, t)).collect(),
        }
    }

    pub fn insert(&mut self, token: TokenInfo) {
        self.tokens.insert(token.token_id, token);
    }

    pub fn get(&self, token_id: TokenId) -> Result<&TokenInfo, RollupError> {
        self.tokens
            .get(&token_id)
            .ok_or(RollupError::UnknownToken { token_id })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenInfo> {
        self.tokens.values()
    }
}

/// Receives loan settlements emitted by executed blocks.
pub trait LoanLedger: Send + Sync {
    fn settle_loan(&self, loan: &LoanSettlement, borrower: Address);
}

/// Receives protocol fee withdrawals (base-ledger units).
pub trait FeeSink: Send + Sync {
    fn credit_fee(&self, token_id: TokenId, amount: u128);
}

pub struct LoggingLoanLedger;

impl LoanLedger for LoggingLoanLedger {
    fn settle_loan(&self, loan: &LoanSettlement, borrower: Address) {
        info!(
            borrower = %borrower,
            account_id = loan.account_id,
            collateral_token_id = loan.collateral_token_id,
            collateral_amount = %loan.collateral_amount,
            debt_token_id = loan.debt_token_id,
            debt_amount = %loan.debt_amount,
            maturity = loan.maturity,
            "loan settled"
        );
    }
}

pub struct LoggingFeeSink;

impl FeeSink for LoggingFeeSink {
    fn credit_fee(&self, token_id: TokenId, amount: u128) {
        info!(token_id, amount = %amount, "protocol fee credited");
    }
}

/// Keeps every settlement it receives. Useful for assertions.
#[derive(Default)]
pub struct RecordingLoanLedger {
    settled: Mutex<Vec<(LoanSettlement, Address)>>,
}

impl RecordingLoanLedger {
    pub fn settled(&self) -> Vec<(LoanSettlement, Address)> {
        self.settled
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl LoanLedger for RecordingLoanLedger {
    fn settle_loan(&self, loan: &LoanSettlement, borrower: Address) {
        if let Ok(mut guard) = self.settled.lock() {
            guard.push((*loan, borrower));
        }
    }
}

#[derive(Default)]
pub struct RecordingFeeSink {
    credited: Mutex<Vec<(TokenId, u128)>>,
}

impl RecordingFeeSink {
    pub fn credited(&self) -> Vec<(TokenId, u128)> {
        self.credited
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl FeeSink for RecordingFeeSink {
    fn credit_fee(&self, token_id: TokenId, amount: u128) {
        if let Ok(mut guard) = self.credited.lock() {
            guard.push((token_id, amount));
        }
    }
}
