// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The balance engine.
//!
//! Mutations follow one protocol: validate, take the account's lock, read the
//! current balance, compute and check the new balance, append the history
//! entry, write the balance, release the lock. Validation failures never touch
//! the lock or the stores.
//!
//! If the history append succeeds but the balance write fails, the two
//! diverge. The balance store stays authoritative; [`Engine::audit`] reports
//! such accounts.

use crate::base::{AccountId, Points, Timestamp};
use crate::error::BalanceError;
use crate::lock_registry::{AccountLockGuard, AccountLockRegistry};
use crate::point::{AccountBalance, HistoryEntry, TransactionKind};
use crate::store::{BalanceStore, HistoryLog, MemoryBalanceStore, MemoryHistoryLog};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Tunables for [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a mutation waits for its account before giving up with
    /// [`BalanceError::LockTimeout`].
    pub lock_timeout: Duration,
}

impl EngineConfig {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Result of comparing an account's stored balance with its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub account_id: AccountId,
    /// Balance as stored.
    pub balance: Points,
    /// Charges minus uses over the full history, `None` if the sum overflows.
    pub derived: Option<Points>,
    /// Number of history entries.
    pub entries: usize,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.derived == Some(self.balance)
    }
}

/// Point balance engine.
///
/// Safe to share between threads: mutations of the same account are
/// serialized by a per-account lock, everything else runs in parallel.
pub struct Engine<B = MemoryBalanceStore, H = MemoryHistoryLog> {
    balances: B,
    history: H,
    locks: AccountLockRegistry,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine backed by empty in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(MemoryBalanceStore::new(), MemoryHistoryLog::new())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<B: BalanceStore, H: HistoryLog> Engine<B, H> {
    pub fn new(balances: B, history: H) -> Self {
        Self::with_config(balances, history, EngineConfig::default())
    }

    pub fn with_config(balances: B, history: H, config: EngineConfig) -> Self {
        Self {
            balances,
            history,
            locks: AccountLockRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn balances(&self) -> &B {
        &self.balances
    }

    pub fn history_log(&self) -> &H {
        &self.history
    }

    pub fn locks(&self) -> &AccountLockRegistry {
        &self.locks
    }

    /// Current balance of `account_id`; zero for an account never mutated.
    ///
    /// Takes no lock, so a mutation in flight is not visible until it commits.
    pub fn get_balance(&self, account_id: AccountId) -> Result<AccountBalance, BalanceError> {
        validate_account(account_id)?;
        Ok(self.balances.read(account_id)?)
    }

    /// History of `account_id`, oldest first. Empty for an unknown account.
    pub fn get_history(&self, account_id: AccountId) -> Result<Vec<HistoryEntry>, BalanceError> {
        validate_account(account_id)?;
        Ok(self.history.read_all(account_id)?)
    }

    /// Adds `amount` points to `account_id`.
    ///
    /// # Errors
    ///
    /// - [`BalanceError::InvalidAccountId`] - Account id is not positive.
    /// - [`BalanceError::InvalidAmount`] - Amount is not positive.
    /// - [`BalanceError::BalanceOverflow`] - Result would exceed [`MAX_BALANCE`](crate::MAX_BALANCE).
    /// - [`BalanceError::LockTimeout`] - Account stayed busy for the configured timeout.
    /// - [`BalanceError::Storage`] - A store failed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn charge(
        &self,
        account_id: AccountId,
        amount: Points,
    ) -> Result<AccountBalance, BalanceError> {
        self.mutate(account_id, amount, TransactionKind::Charge)
    }

    /// Spends `amount` points of `account_id`. Spending the whole balance is allowed.
    ///
    /// # Errors
    ///
    /// As [`Engine::charge`], with [`BalanceError::InsufficientBalance`] in
    /// place of overflow when the balance is smaller than `amount`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn use_points(
        &self,
        account_id: AccountId,
        amount: Points,
    ) -> Result<AccountBalance, BalanceError> {
        self.mutate(account_id, amount, TransactionKind::Use)
    }

    /// Compares the stored balance of `account_id` with the sum of its history.
    ///
    /// Runs under the account lock so no mutation is half applied while it reads.
    /// Nothing is repaired.
    pub fn audit(&self, account_id: AccountId) -> Result<AuditReport, BalanceError> {
        validate_account(account_id)?;
        let _guard = self.lock(account_id)?;

        let balance = self.balances.read(account_id)?;
        let entries = self.history.read_all(account_id)?;
        let derived = entries
            .iter()
            .try_fold(0, |total: Points, entry| entry.kind.apply(total, entry.amount));

        let report = AuditReport {
            account_id,
            balance: balance.balance,
            derived,
            entries: entries.len(),
        };
        if !report.is_consistent() {
            warn!(
                account = %account_id,
                balance = report.balance,
                derived = ?report.derived,
                "balance diverges from history"
            );
        }
        Ok(report)
    }

    fn mutate(
        &self,
        account_id: AccountId,
        amount: Points,
        kind: TransactionKind,
    ) -> Result<AccountBalance, BalanceError> {
        validate_account(account_id)?;
        validate_amount(amount)?;

        let _guard = self.lock(account_id)?;

        let current = self.balances.read(account_id)?.balance;
        let balance = next_balance(current, amount, kind)?;
        let now = Timestamp::now();

        self.history
            .append(account_id, amount, kind, now)
            .inspect_err(|e| {
                error!(account = %account_id, %kind, amount, "history append failed: {e}")
            })?;

        let updated = self
            .balances
            .write(account_id, balance, now)
            .inspect_err(|e| {
                error!(
                    account = %account_id,
                    %kind,
                    amount,
                    previous = current,
                    intended = balance,
                    "balance write failed after history append: {e}"
                )
            })?;

        debug!(account = %account_id, %kind, amount, balance, "committed");
        Ok(updated)
    }

    fn lock(&self, account_id: AccountId) -> Result<AccountLockGuard, BalanceError> {
        self.locks
            .acquire(account_id, self.config.lock_timeout)
            .inspect_err(|e| warn!(account = %account_id, "{e}"))
    }
}

fn validate_account(account_id: AccountId) -> Result<(), BalanceError> {
    if account_id.is_valid() {
        Ok(())
    } else {
        Err(BalanceError::InvalidAccountId(account_id))
    }
}

fn validate_amount(amount: Points) -> Result<(), BalanceError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(BalanceError::InvalidAmount(amount))
    }
}

/// Balance after applying `amount` in direction `kind` to `current`.
fn next_balance(
    current: Points,
    amount: Points,
    kind: TransactionKind,
) -> Result<Points, BalanceError> {
    match kind {
        TransactionKind::Charge => kind
            .apply(current, amount)
            .ok_or(BalanceError::BalanceOverflow { current, amount }),
        TransactionKind::Use if current < amount => Err(BalanceError::InsufficientBalance {
            current,
            requested: amount,
        }),
        TransactionKind::Use => Ok(current - amount),
    }
}
