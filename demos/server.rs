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

//! REST API server for the point ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ```bash
//! # Charge
//! curl -X PATCH http://localhost:3000/point/7/charge \
//!   -H "Content-Type: application/json" -d '1000'
//!
//! # Use
//! curl -X PATCH http://localhost:3000/point/7/use \
//!   -H "Content-Type: application/json" -d '300'
//!
//! # Balance
//! curl http://localhost:3000/point/7
//!
//! # History
//! curl http://localhost:3000/point/7/histories
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use point_ledger_rs::{
    AccountBalance, AccountId, BalanceError, Engine, HistoryEntry, Points, TransactionKind,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the point engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Converts engine failures into HTTP responses.
pub enum AppError {
    Balance(BalanceError),
    /// The blocking task running the engine call did not complete.
    Internal(String),
}

impl From<BalanceError> for AppError {
    fn from(err: BalanceError) -> Self {
        AppError::Balance(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = match &self {
            AppError::Balance(err) => {
                let (status, code) = match err {
                    BalanceError::InvalidAccountId(_) => {
                        (StatusCode::BAD_REQUEST, "INVALID_ACCOUNT_ID")
                    }
                    BalanceError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                    BalanceError::InsufficientBalance { .. } => {
                        (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
                    }
                    BalanceError::BalanceOverflow { .. } => {
                        (StatusCode::BAD_REQUEST, "BALANCE_OVERFLOW")
                    }
                    BalanceError::LockTimeout { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT")
                    }
                    BalanceError::Storage(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE")
                    }
                };
                (status, code, err.to_string())
            }
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                message.clone(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Runs a blocking engine call off the async runtime.
async fn run_blocking<T, F>(state: &AppState, call: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, BalanceError> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || call(&engine))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

// === Handlers ===

/// GET /point/{id} - Current balance.
async fn point(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AccountBalance>, AppError> {
    Ok(Json(state.engine.get_balance(AccountId(id))?))
}

/// GET /point/{id}/histories - Charge/use history, oldest first.
async fn histories(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    Ok(Json(state.engine.get_history(AccountId(id))?))
}

/// PATCH /point/{id}/charge - Add points.
async fn charge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(amount): Json<Points>,
) -> Result<Json<AccountBalance>, AppError> {
    mutate(state, id, amount, TransactionKind::Charge).await
}

/// PATCH /point/{id}/use - Spend points.
async fn use_points(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(amount): Json<Points>,
) -> Result<Json<AccountBalance>, AppError> {
    mutate(state, id, amount, TransactionKind::Use).await
}

async fn mutate(
    state: AppState,
    id: i64,
    amount: Points,
    kind: TransactionKind,
) -> Result<Json<AccountBalance>, AppError> {
    let account_id = AccountId(id);
    let balance = run_blocking(&state, move |engine| match kind {
        TransactionKind::Charge => engine.charge(account_id, amount),
        TransactionKind::Use => engine.use_points(account_id, amount),
    })
    .await?;
    Ok(Json(balance))
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/point/{id}", get(point))
        .route("/point/{id}/histories", get(histories))
        .route("/point/{id}/charge", patch(charge))
        .route("/point/{id}/use", patch(use_points))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = AppState {
        engine: Arc::new(Engine::in_memory()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    tracing::info!("Point API server running on http://127.0.0.1:3000");
    tracing::info!("  GET   /point/{{id}}            - Balance");
    tracing::info!("  GET   /point/{{id}}/histories  - History");
    tracing::info!("  PATCH /point/{{id}}/charge     - Charge (JSON integer body)");
    tracing::info!("  PATCH /point/{{id}}/use        - Use (JSON integer body)");

    axum::serve(listener, app).await.unwrap();
}
