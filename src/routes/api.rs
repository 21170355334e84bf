// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes called by the mini-app.

use crate::error::{AppError, Result};
use crate::models::{FinalizeOutcome, StreakStatus, UserRef};
use crate::services::FinishedActivity;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::{Validate, ValidationError};

/// Longest single activity accepted (one day).
pub const MAX_STUDY_SECONDS: u32 = 86_400;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/streak/finish", post(finish_activity))
        .route("/api/streak/{user_id}", get(get_status))
}

// ─── Finish Activity ─────────────────────────────────────────

/// A finished lesson, identified by user ID or Telegram ID.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_identifier"))]
pub struct FinishRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
    pub telegram_id: Option<i64>,
    #[serde(default)]
    pub perfect: bool,
    #[validate(range(max = MAX_STUDY_SECONDS))]
    pub study_seconds: Option<u32>,
}

fn validate_identifier(req: &FinishRequest) -> std::result::Result<(), ValidationError> {
    match (&req.user_id, req.telegram_id) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        _ => Err(ValidationError::new("exactly_one_identifier")
            .with_message("exactly one of user_id or telegram_id is required".into())),
    }
}

impl FinishRequest {
    fn user_ref(&self) -> Result<UserRef> {
        match (&self.user_id, self.telegram_id) {
            (Some(id), None) => Ok(UserRef::Id(id.clone())),
            (None, Some(tg)) => Ok(UserRef::External(tg)),
            _ => Err(AppError::BadRequest(
                "exactly one of user_id or telegram_id is required".to_string(),
            )),
        }
    }
}

/// Record a finished lesson and return the updated streak.
async fn finish_activity(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FinishRequest>,
) -> Result<Json<FinalizeOutcome>> {
    req.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let user_ref = req.user_ref()?;

    let activity = FinishedActivity {
        perfect: req.perfect,
        study_seconds: req.study_seconds,
    };

    let outcome = state
        .streaks
        .finalize_activity(&user_ref, &activity, chrono::Utc::now())
        .await?;
    Ok(Json(outcome))
}

// ─── Status ──────────────────────────────────────────────────

/// Streak counters and recent ledger rows for the calendar view.
async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StreakStatus>> {
    let status = state
        .streaks
        .streak_status(&UserRef::Id(user_id), chrono::Utc::now())
        .await?;
    Ok(Json(status))
}
