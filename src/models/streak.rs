// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily streak ledger and the results of streak operations.

use crate::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// What a ledger day records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum DayKind {
    /// The user completed an activity that day.
    Active,
    /// The day was excused by a freeze.
    Freeze,
}

impl DayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayKind::Active => "active",
            DayKind::Freeze => "freeze",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(DayKind::Active),
            "freeze" | "frozen" => Some(DayKind::Freeze),
            _ => None,
        }
    }
}

/// One ledger row: at most one per (user, day).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StreakDay {
    pub user_id: String,
    pub day: NaiveDate,
    pub kind: DayKind,
}

impl StreakDay {
    pub fn new(user_id: impl Into<String>, day: NaiveDate, kind: DayKind) -> Self {
        Self {
            user_id: user_id.into(),
            day,
            kind,
        }
    }
}

/// Result of a keep-first ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; the row was written.
    Inserted,
    /// A row with the same kind already existed.
    Unchanged,
    /// A row with a different kind already existed and was kept.
    Conflict { existing: DayKind },
}

/// Counters returned after a finished activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FinalizeOutcome {
    pub user_id: String,
    pub day: NaiveDate,
    pub current_streak: u32,
    pub max_streak: u32,
    pub perfect_count: u32,
    pub last_active_at: DateTime<Utc>,
    /// `false` when today was already counted and only reconciled.
    pub counted_today: bool,
}

/// Streak state for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StreakStatus {
    pub user_id: String,
    pub today: NaiveDate,
    pub current_streak: u32,
    pub max_streak: u32,
    pub freeze_tokens: u32,
    pub is_subscriber: bool,
    pub today_done: bool,
    /// Recent ledger rows, oldest first.
    pub days: Vec<StreakDay>,
}

/// A user whose streak will be at stake tonight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AtRiskUser {
    pub user_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub telegram_id: Option<i64>,
    pub today: NaiveDate,
    pub current_streak: u32,
    pub freeze_tokens: u32,
    pub is_subscriber: bool,
}

/// What the sweep did for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum SweepAction {
    /// Yesterday already had a ledger row.
    AlreadyResolved,
    /// Subscriber grace freeze, no token spent.
    GraceFreeze,
    /// Freeze paid with one token.
    TokenFreeze,
    /// Streak reset to zero.
    Reset,
    /// A freeze row appeared concurrently; nothing was spent.
    RacedFreeze,
}

/// Before/after state of one user in a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSweepOutcome {
    pub user_id: String,
    /// The user's local yesterday.
    pub day: NaiveDate,
    pub action: SweepAction,
    pub streak_before: u32,
    pub streak_after: u32,
    pub tokens_before: u32,
    pub tokens_after: u32,
}

/// A user the sweep could not resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SweepFailure {
    pub user_id: String,
    pub reason: String,
    /// Re-running the sweep may resolve this user.
    pub retryable: bool,
}

/// Aggregate result of a nightly sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SweepReport {
    pub reset_count: u32,
    pub freeze_count: u32,
    pub tokens_spent: u32,
    pub skipped_count: u32,
    pub outcomes: Vec<UserSweepOutcome>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// Record a resolved user and bump the matching counter.
    pub fn record(&mut self, outcome: UserSweepOutcome) {
        match outcome.action {
            SweepAction::AlreadyResolved | SweepAction::RacedFreeze => self.skipped_count += 1,
            SweepAction::GraceFreeze => self.freeze_count += 1,
            SweepAction::TokenFreeze => {
                self.freeze_count += 1;
                self.tokens_spent += 1;
            }
            SweepAction::Reset => self.reset_count += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn record_failure(&mut self, user_id: impl Into<String>, context: &str, err: &AppError) {
        self.failures.push(SweepFailure {
            user_id: user_id.into(),
            reason: format!("{}: {}", context, err),
            retryable: err.is_retryable(),
        });
    }
}
