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

//! Per-account mutual exclusion.
//!
//! Every account id maps to its own mutex, created on first use. Mutations of
//! one account are serialized while different accounts never contend.
//!
//! # Example
//!
//! ```
//! use point_ledger_rs::{AccountId, AccountLockRegistry};
//! use std::time::Duration;
//!
//! let registry = AccountLockRegistry::new();
//! let guard = registry.acquire(AccountId(1), Duration::from_secs(1)).unwrap();
//!
//! // A second account is independent of the first.
//! let other = registry.acquire(AccountId(2), Duration::ZERO).unwrap();
//!
//! // The same account is not.
//! assert!(registry.acquire(AccountId(1), Duration::ZERO).is_err());
//!
//! drop(guard);
//! drop(other);
//! assert!(registry.acquire(AccountId(1), Duration::ZERO).is_ok());
//! ```

use crate::base::AccountId;
use crate::error::BalanceError;
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

type AccountLock = Arc<Mutex<()>>;

/// Exclusive hold on one account. The account is released when this is dropped.
pub struct AccountLockGuard {
    account_id: AccountId,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl AccountLockGuard {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl fmt::Debug for AccountLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountLockGuard")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Lazily populated map from account id to that account's mutex.
#[derive(Debug, Default)]
pub struct AccountLockRegistry {
    locks: DashMap<AccountId, AccountLock>,
}

impl AccountLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `account_id` is free or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`BalanceError::LockTimeout`] if another holder kept the account for
    /// longer than `timeout`.
    pub fn acquire(
        &self,
        account_id: AccountId,
        timeout: Duration,
    ) -> Result<AccountLockGuard, BalanceError> {
        let lock = self.lock_for(account_id);
        let started = Instant::now();

        match lock.try_lock_arc_for(timeout) {
            Some(guard) => Ok(AccountLockGuard {
                account_id,
                _guard: guard,
            }),
            None => Err(BalanceError::LockTimeout {
                account_id,
                waited: started.elapsed(),
            }),
        }
    }

    /// Number of accounts that currently have a mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drops the mutexes of accounts nobody holds or waits on.
    ///
    /// Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        // Clones are only handed out under the shard lock that `retain` also
        // takes, so a count of one means no guard or waiter can exist.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Returns the account's mutex, creating it if absent.
    fn lock_for(&self, account_id: AccountId) -> AccountLock {
        self.locks.entry(account_id).or_default().clone()
    }
}
