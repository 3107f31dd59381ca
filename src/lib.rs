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

//! # Point Ledger
//!
//! This library keeps per-account point balances. Balances change only
//! through two operations, charge (credit) and use (debit), and every change
//! is recorded in an append-only history.
//!
//! ## Core Components
//!
//! - [`Engine`]: Validates requests and applies them to the stores under a per-account lock
//! - [`AccountLockRegistry`]: Lazily created mutex per account id
//! - [`BalanceStore`] / [`HistoryLog`]: Storage collaborators, with in-memory implementations
//! - [`BalanceError`]: Typed failures, one variant per distinguishable cause
//!
//! ## Example
//!
//! ```
//! use point_ledger_rs::{AccountId, BalanceError, Engine, TransactionKind};
//!
//! let engine = Engine::in_memory();
//! let account = AccountId(7);
//!
//! assert_eq!(engine.charge(account, 1000).unwrap().balance, 1000);
//! assert_eq!(engine.use_points(account, 300).unwrap().balance, 700);
//!
//! let err = engine.use_points(account, 800).unwrap_err();
//! assert_eq!(
//!     err,
//!     BalanceError::InsufficientBalance { current: 700, requested: 800 }
//! );
//!
//! let kinds: Vec<_> = engine
//!     .get_history(account)
//!     .unwrap()
//!     .iter()
//!     .map(|entry| entry.kind)
//!     .collect();
//! assert_eq!(kinds, vec![TransactionKind::Charge, TransactionKind::Use]);
//! ```
//!
//! ## Thread Safety
//!
//! Mutations of the same account are linearized by its lock. Different
//! accounts never wait on each other. Reads take no lock and see the last
//! committed balance.

mod base;
mod engine;
pub mod error;
mod lock_registry;
mod point;
pub mod store;

pub use base::{AccountId, HistoryId, MAX_BALANCE, Points, Timestamp};
pub use engine::{AuditReport, Engine, EngineConfig};
pub use error::{BalanceError, StorageError};
pub use lock_registry::{AccountLockGuard, AccountLockRegistry};
pub use point::{AccountBalance, HistoryEntry, TransactionKind};
pub use store::{BalanceStore, HistoryLog, MemoryBalanceStore, MemoryHistoryLog};
