// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task handler routes for scheduled jobs.
//!
//! These endpoints are called by the scheduler, not directly by users.

use crate::error::Result;
use crate::models::{AtRiskUser, SweepReport};
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// Task handler routes (called by the scheduler).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/streak-reset", post(streak_reset))
        .route("/tasks/streak-at-risk", get(streak_at_risk))
}

/// Nightly reset/freeze sweep.
///
/// Per-user failures are reported in the body with a 200; only a failure to
/// list users fails the request.
async fn streak_reset(State(state): State<Arc<AppState>>) -> Result<Json<SweepReport>> {
    tracing::info!("Nightly streak sweep triggered");
    let report = state.streaks.run_nightly_sweep(chrono::Utc::now()).await?;

    if !report.failures.is_empty() {
        tracing::warn!(
            failed = report.failures.len(),
            "Streak sweep finished with per-user failures"
        );
    }
    Ok(Json(report))
}

/// Users whose streak ends tonight unless they study.
async fn streak_at_risk(State(state): State<Arc<AppState>>) -> Result<Json<Vec<AtRiskUser>>> {
    let users = state.streaks.at_risk_users(chrono::Utc::now()).await?;
    tracing::info!(count = users.len(), "Listed at-risk users");
    Ok(Json(users))
}
