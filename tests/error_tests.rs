// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDate;
use streak_engine::error::AppError;
use streak_engine::models::DayKind;

#[test]
fn test_status_codes() {
    let cases = [
        (AppError::UserNotFound("u1".to_string()), StatusCode::NOT_FOUND),
        (AppError::BadRequest("nope".to_string()), StatusCode::BAD_REQUEST),
        (
            AppError::DayConflict {
                day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                existing: DayKind::Freeze,
            },
            StatusCode::CONFLICT,
        ),
        (
            AppError::LedgerWriteFailed("down".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            AppError::CounterUpdateFailed("down".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            AppError::EntitlementConflict("down".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            AppError::Internal(anyhow::anyhow!("boom")),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, status) in cases {
        assert_eq!(err.into_response().status(), status);
    }
}

#[test]
fn test_day_conflict_message() {
    let err = AppError::DayConflict {
        day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        existing: DayKind::Freeze,
    };
    assert_eq!(err.to_string(), "Day 2024-01-02 is already recorded as freeze");
}

#[test]
fn test_retryable() {
    assert!(AppError::LedgerWriteFailed("x".to_string()).is_retryable());
    assert!(AppError::CounterUpdateFailed("x".to_string()).is_retryable());
    assert!(AppError::Database("x".to_string()).is_retryable());
    assert!(!AppError::UserNotFound("x".to_string()).is_retryable());
    assert!(!AppError::BadRequest("x".to_string()).is_retryable());
}
