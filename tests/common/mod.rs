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

//! Collaborator doubles shared by the integration tests.

#![allow(dead_code)]

use point_ledger_rs::{
    AccountBalance, AccountId, BalanceStore, HistoryEntry, HistoryLog, MemoryBalanceStore,
    MemoryHistoryLog, Points, StorageError, Timestamp, TransactionKind,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory balance store that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingBalances {
    inner: MemoryBalanceStore,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl RecordingBalances {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BalanceStore for RecordingBalances {
    fn read(&self, account_id: AccountId) -> Result<AccountBalance, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("balance read refused".into()));
        }
        self.inner.read(account_id)
    }

    fn write(
        &self,
        account_id: AccountId,
        balance: Points,
        updated_at: Timestamp,
    ) -> Result<AccountBalance, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("balance write refused".into()));
        }
        self.inner.write(account_id, balance, updated_at)
    }
}

/// In-memory history log that counts calls and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingHistory {
    inner: MemoryHistoryLog,
    pub appends: AtomicUsize,
    pub fail_appends: AtomicBool,
}

impl RecordingHistory {
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

impl HistoryLog for RecordingHistory {
    fn append(
        &self,
        account_id: AccountId,
        amount: Points,
        kind: TransactionKind,
        timestamp: Timestamp,
    ) -> Result<HistoryEntry, StorageError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("history append refused".into()));
        }
        self.inner.append(account_id, amount, kind, timestamp)
    }

    fn read_all(&self, account_id: AccountId) -> Result<Vec<HistoryEntry>, StorageError> {
        self.inner.read_all(account_id)
    }
}

/// Charges minus uses over `entries`.
pub fn history_sum(entries: &[HistoryEntry]) -> Points {
    entries.iter().map(HistoryEntry::signed_amount).sum()
}
