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

//! Error types for balance queries and mutations.

use crate::base::{AccountId, Points};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`BalanceStore`](crate::BalanceStore) or
/// [`HistoryLog`](crate::HistoryLog).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend cannot be reached or refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Backend returned data that cannot be interpreted
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

/// Balance engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// Account id is zero or negative
    #[error("invalid account id {0} (must be positive)")]
    InvalidAccountId(AccountId),

    /// Amount is zero or negative
    #[error("invalid amount {0} (must be positive)")]
    InvalidAmount(Points),

    /// Use would take the balance below zero
    #[error("insufficient balance: have {current}, need {requested}")]
    InsufficientBalance { current: Points, requested: Points },

    /// Charge would exceed the maximum balance
    #[error("balance overflow: {current} + {amount} exceeds the maximum balance")]
    BalanceOverflow { current: Points, amount: Points },

    /// Another mutation held the account for longer than the configured bound
    #[error("timed out after {waited:?} waiting for account {account_id}")]
    LockTimeout {
        account_id: AccountId,
        waited: Duration,
    },

    /// Underlying store or log failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BalanceError {
    /// Whether repeating the same request may succeed without any other
    /// change to the account.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Storage(_))
    }
}
