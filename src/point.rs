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

//! Balance and history records.

use crate::base::{AccountId, HistoryId, Points, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current point balance of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub balance: Points,
    pub updated_at: Timestamp,
}

impl AccountBalance {
    /// The record reported for an account that has never been written.
    pub fn empty(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: 0,
            updated_at: Timestamp::default(),
        }
    }
}

/// Direction of a balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Credit.
    Charge,
    /// Debit.
    Use,
}

impl TransactionKind {
    /// Applies `amount` in this direction to a running total.
    ///
    /// Returns `None` when the result is not representable.
    pub fn apply(self, total: Points, amount: Points) -> Option<Points> {
        match self {
            Self::Charge => total.checked_add(amount),
            Self::Use => total.checked_sub(amount),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => f.write_str("CHARGE"),
            Self::Use => f.write_str("USE"),
        }
    }
}

/// Immutable record of one applied charge or use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub history_id: HistoryId,
    pub account_id: AccountId,
    pub amount: Points,
    pub kind: TransactionKind,
    pub timestamp: Timestamp,
}

impl HistoryEntry {
    /// Amount with the sign of its effect on the balance.
    pub fn signed_amount(&self) -> Points {
        match self.kind {
            TransactionKind::Charge => self.amount,
            TransactionKind::Use => -self.amount,
        }
    }
}
