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

//! Storage collaborators consumed by the [`Engine`](crate::Engine).
//!
//! The engine only needs point reads and upserts of balances plus an
//! append-only, per-account history. [`MemoryBalanceStore`] and
//! [`MemoryHistoryLog`] provide both in process memory.

use crate::base::{AccountId, HistoryId, Points, Timestamp};
use crate::error::StorageError;
use crate::point::{AccountBalance, HistoryEntry, TransactionKind};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Holds the current balance of every account.
pub trait BalanceStore: Send + Sync {
    /// Reads the balance of `account_id`.
    ///
    /// An account that was never written reads as [`AccountBalance::empty`].
    fn read(&self, account_id: AccountId) -> Result<AccountBalance, StorageError>;

    /// Inserts or replaces the balance of `account_id`, returning the stored record.
    fn write(
        &self,
        account_id: AccountId,
        balance: Points,
        updated_at: Timestamp,
    ) -> Result<AccountBalance, StorageError>;
}

/// Append-only record of applied transactions.
pub trait HistoryLog: Send + Sync {
    /// Appends an entry for `account_id`, returning it with its assigned id.
    fn append(
        &self,
        account_id: AccountId,
        amount: Points,
        kind: TransactionKind,
        timestamp: Timestamp,
    ) -> Result<HistoryEntry, StorageError>;

    /// Every entry of `account_id` in the order it was appended.
    fn read_all(&self, account_id: AccountId) -> Result<Vec<HistoryEntry>, StorageError>;
}

impl<T: BalanceStore + ?Sized> BalanceStore for Arc<T> {
    fn read(&self, account_id: AccountId) -> Result<AccountBalance, StorageError> {
        (**self).read(account_id)
    }

    fn write(
        &self,
        account_id: AccountId,
        balance: Points,
        updated_at: Timestamp,
    ) -> Result<AccountBalance, StorageError> {
        (**self).write(account_id, balance, updated_at)
    }
}

impl<T: HistoryLog + ?Sized> HistoryLog for Arc<T> {
    fn append(
        &self,
        account_id: AccountId,
        amount: Points,
        kind: TransactionKind,
        timestamp: Timestamp,
    ) -> Result<HistoryEntry, StorageError> {
        (**self).append(account_id, amount, kind, timestamp)
    }

    fn read_all(&self, account_id: AccountId) -> Result<Vec<HistoryEntry>, StorageError> {
        (**self).read_all(account_id)
    }
}

/// In-memory [`BalanceStore`].
#[derive(Debug, Default)]
pub struct MemoryBalanceStore {
    balances: DashMap<AccountId, AccountBalance>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored balances ordered by account id.
    pub fn snapshot(&self) -> Vec<AccountBalance> {
        let mut balances: Vec<AccountBalance> =
            self.balances.iter().map(|entry| *entry.value()).collect();
        balances.sort_by_key(|balance| balance.account_id);
        balances
    }
}

impl BalanceStore for MemoryBalanceStore {
    fn read(&self, account_id: AccountId) -> Result<AccountBalance, StorageError> {
        Ok(self
            .balances
            .get(&account_id)
            .map(|entry| *entry.value())
            .unwrap_or_else(|| AccountBalance::empty(account_id)))
    }

    fn write(
        &self,
        account_id: AccountId,
        balance: Points,
        updated_at: Timestamp,
    ) -> Result<AccountBalance, StorageError> {
        let record = AccountBalance {
            account_id,
            balance,
            updated_at,
        };
        self.balances.insert(account_id, record);
        Ok(record)
    }
}

/// In-memory [`HistoryLog`].
///
/// History ids are unique across all accounts and increase in append order.
#[derive(Debug)]
pub struct MemoryHistoryLog {
    entries: DashMap<AccountId, Vec<HistoryEntry>>,
    next_id: AtomicU64,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of entries across all accounts.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry of every account ordered by history id.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .entries
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.history_id);
        entries
    }
}

impl Default for MemoryHistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog for MemoryHistoryLog {
    fn append(
        &self,
        account_id: AccountId,
        amount: Points,
        kind: TransactionKind,
        timestamp: Timestamp,
    ) -> Result<HistoryEntry, StorageError> {
        // The id is drawn while the account's shard is held so per-account
        // order and id order agree.
        let mut entries = self.entries.entry(account_id).or_default();
        let entry = HistoryEntry {
            history_id: HistoryId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            account_id,
            amount,
            kind,
            timestamp,
        };
        entries.push(entry);
        Ok(entry)
    }

    fn read_all(&self, account_id: AccountId) -> Result<Vec<HistoryEntry>, StorageError> {
        Ok(self
            .entries
            .get(&account_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_balance_reads_as_zero() {
        let store = MemoryBalanceStore::new();
        let balance = store.read(AccountId(5)).unwrap();
        assert_eq!(balance, AccountBalance::empty(AccountId(5)));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn write_upserts_balance() {
        let store = MemoryBalanceStore::new();
        store.write(AccountId(1), 100, Timestamp(10)).unwrap();
        let stored = store.write(AccountId(1), 40, Timestamp(20)).unwrap();

        assert_eq!(stored.balance, 40);
        assert_eq!(store.read(AccountId(1)).unwrap(), stored);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_is_sorted_by_account() {
        let store = MemoryBalanceStore::new();
        for id in [3, 1, 2] {
            store.write(AccountId(id), id * 10, Timestamp(1)).unwrap();
        }
        let ids: Vec<i64> = store.snapshot().iter().map(|b| b.account_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn history_is_empty_for_unknown_account() {
        let log = MemoryHistoryLog::new();
        assert!(log.read_all(AccountId(1)).unwrap().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn history_keeps_append_order_per_account() {
        let log = MemoryHistoryLog::new();
        log.append(AccountId(1), 100, TransactionKind::Charge, Timestamp(1))
            .unwrap();
        log.append(AccountId(2), 5, TransactionKind::Charge, Timestamp(2))
            .unwrap();
        log.append(AccountId(1), 30, TransactionKind::Use, Timestamp(3))
            .unwrap();

        let entries = log.read_all(AccountId(1)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, TransactionKind::Charge);
        assert_eq!(entries[0].amount, 100);
        assert_eq!(entries[1].kind, TransactionKind::Use);
        assert_eq!(entries[1].amount, 30);
        assert!(entries[0].history_id < entries[1].history_id);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn history_ids_are_unique_and_start_at_one() {
        let log = MemoryHistoryLog::new();
        let first = log
            .append(AccountId(1), 1, TransactionKind::Charge, Timestamp(1))
            .unwrap();
        let second = log
            .append(AccountId(2), 1, TransactionKind::Charge, Timestamp(1))
            .unwrap();
        assert_eq!(first.history_id, HistoryId(1));
        assert_eq!(second.history_id, HistoryId(2));

        let ids: Vec<u64> = log.snapshot().iter().map(|e| e.history_id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn shared_stores_work_through_arc() {
        let store = Arc::new(MemoryBalanceStore::new());
        let handle: &dyn BalanceStore = &store;
        handle.write(AccountId(1), 9, Timestamp(1)).unwrap();
        assert_eq!(store.read(AccountId(1)).unwrap().balance, 9);
    }
}
