// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! The streak engine talks to storage only through [`UserDirectory`] and
//! [`StreakLedger`]. Firestore backs production; the memory store backs tests
//! and local runs.

pub mod batch;
pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{DayKind, StreakDay, UpsertOutcome, User, UserPatch, UserRef};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// One document per (user, day)
    pub const STREAK_DAYS: &str = "streak_days";
}

/// Lookup and partial update of user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetch a user by ID or external identifier.
    async fn get_user(&self, user: &UserRef) -> Result<Option<User>, AppError>;

    /// All users with a non-zero current streak.
    async fn list_streaking_users(&self) -> Result<Vec<User>, AppError>;

    /// Apply a partial update to one user.
    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), AppError>;

    /// Apply partial updates to many users as one batch.
    ///
    /// Either the whole batch is applied or an error is returned.
    async fn update_users(&self, updates: &[(String, UserPatch)]) -> Result<(), AppError>;
}

/// Per-user daily ledger with (user, day) uniqueness.
#[async_trait]
pub trait StreakLedger: Send + Sync {
    /// Keep-first write of one ledger row.
    ///
    /// An existing row is never replaced; a different kind is reported as
    /// [`UpsertOutcome::Conflict`].
    async fn upsert_day(&self, day: &StreakDay) -> Result<UpsertOutcome, AppError>;

    /// Keep-first write of many rows as one batch; outcomes are in input order.
    async fn upsert_days(&self, days: &[StreakDay]) -> Result<Vec<UpsertOutcome>, AppError>;

    /// Keep-first freeze row paid with one of the owner's freeze tokens.
    ///
    /// The row and the token decrement commit together: the token is spent
    /// exactly when the outcome is [`UpsertOutcome::Inserted`], and an error
    /// means neither was written.
    async fn insert_paid_freeze(&self, day: &StreakDay) -> Result<UpsertOutcome, AppError>;

    /// [`Self::insert_paid_freeze`] for many rows as one batch; outcomes are
    /// in input order.
    async fn insert_paid_freezes(
        &self,
        days: &[StreakDay],
    ) -> Result<Vec<UpsertOutcome>, AppError>;

    /// Rows for one user with `since <= day <= until`, ordered by day.
    async fn get_days(
        &self,
        user_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError>;

    /// Rows for many users with `since <= day <= until`, ordered by user then day.
    async fn get_recent_days(
        &self,
        user_ids: &[String],
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError>;
}

/// Outcome of writing `requested` over a possibly existing row.
pub(crate) fn keep_first(existing: Option<DayKind>, requested: DayKind) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Inserted,
        Some(kind) if kind == requested => UpsertOutcome::Unchanged,
        Some(kind) => UpsertOutcome::Conflict { existing: kind },
    }
}
