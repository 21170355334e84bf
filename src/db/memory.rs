// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store implementing the same contracts as Firestore.
//!
//! Used by tests and by local runs with `STORE_BACKEND=memory`. Failure
//! injection hooks let tests simulate store outages for specific users.

use crate::db::{keep_first, StreakLedger, UserDirectory};
use crate::error::AppError;
use crate::models::{DayKind, StreakDay, UpsertOutcome, User, UserPatch, UserRef};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Memory-backed user directory and streak ledger.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    days: DashMap<(String, NaiveDate), DayKind>,

    // ─── Failure injection ───────────────────────────────────────
    failing_ledger_users: DashSet<String>,
    failing_update_users: DashSet<String>,
    fail_batches: AtomicBool,
    fail_listing: AtomicBool,

    // ─── Call accounting ─────────────────────────────────────────
    batch_reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a user.
    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Current snapshot of a user.
    pub fn user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.value().clone())
    }

    /// Write a ledger row directly, replacing any existing row (test setup).
    pub fn seed_day(&self, user_id: &str, day: NaiveDate, kind: DayKind) {
        self.days.insert((user_id.to_string(), day), kind);
    }

    /// All ledger rows of a user, ordered by day.
    pub fn days_for(&self, user_id: &str) -> Vec<StreakDay> {
        self.collect_days(|uid, _| uid == user_id)
    }

    /// Make every ledger write for `user_id` fail.
    pub fn fail_ledger_writes_for(&self, user_id: &str) {
        self.failing_ledger_users.insert(user_id.to_string());
    }

    /// Make every user update for `user_id` fail.
    pub fn fail_user_updates_for(&self, user_id: &str) {
        self.failing_update_users.insert(user_id.to_string());
    }

    /// Make all batch operations fail as a whole (rows still work).
    pub fn set_fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    /// Make the population listing fail.
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        self.failing_ledger_users.clear();
        self.failing_update_users.clear();
        self.set_fail_batches(false);
        self.set_fail_listing(false);
    }

    /// Number of multi-user ledger reads served.
    pub fn batch_read_count(&self) -> usize {
        self.batch_reads.load(Ordering::SeqCst)
    }

    fn collect_days<F>(&self, keep: F) -> Vec<StreakDay>
    where
        F: Fn(&str, NaiveDate) -> bool,
    {
        let mut rows: Vec<StreakDay> = self
            .days
            .iter()
            .filter(|entry| keep(&entry.key().0, entry.key().1))
            .map(|entry| StreakDay::new(entry.key().0.clone(), entry.key().1, *entry.value()))
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.day.cmp(&b.day)));
        rows
    }

    fn check_ledger_write(&self, day: &StreakDay) -> Result<(), AppError> {
        if self.failing_ledger_users.contains(&day.user_id) {
            return Err(AppError::Database(format!(
                "Injected ledger failure for {}",
                day.user_id
            )));
        }
        Ok(())
    }

    fn check_user_update(&self, user_id: &str) -> Result<(), AppError> {
        if self.failing_update_users.contains(user_id) {
            return Err(AppError::Database(format!(
                "Injected update failure for {}",
                user_id
            )));
        }
        if !self.users.contains_key(user_id) {
            return Err(AppError::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    fn check_batch(&self) -> Result<(), AppError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(AppError::Database("Injected batch failure".to_string()));
        }
        Ok(())
    }

    /// A paid freeze may only be inserted while the owner holds a token.
    fn check_paid_freeze(&self, day: &StreakDay) -> Result<(), AppError> {
        self.check_ledger_write(day)?;
        self.check_user_update(&day.user_id)?;
        let has_row = self.days.contains_key(&(day.user_id.clone(), day.day));
        let tokens = self
            .users
            .get(&day.user_id)
            .map(|u| u.freeze_tokens)
            .unwrap_or(0);
        if !has_row && tokens == 0 {
            return Err(AppError::EntitlementConflict(format!(
                "{} has no freeze tokens left",
                day.user_id
            )));
        }
        Ok(())
    }

    fn write_paid_freeze(&self, day: &StreakDay) -> UpsertOutcome {
        let outcome = self.write_day(day);
        if outcome == UpsertOutcome::Inserted {
            if let Some(mut user) = self.users.get_mut(&day.user_id) {
                user.freeze_tokens = user.freeze_tokens.saturating_sub(1);
            }
        }
        outcome
    }

    fn write_day(&self, day: &StreakDay) -> UpsertOutcome {
        match self.days.entry((day.user_id.clone(), day.day)) {
            Entry::Occupied(existing) => keep_first(Some(*existing.get()), day.kind),
            Entry::Vacant(slot) => {
                slot.insert(day.kind);
                UpsertOutcome::Inserted
            }
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, user: &UserRef) -> Result<Option<User>, AppError> {
        Ok(match user {
            UserRef::Id(id) => self.user(id),
            UserRef::External(tg) => self
                .users
                .iter()
                .find(|u| u.telegram_id == Some(*tg))
                .map(|u| u.value().clone()),
        })
    }

    async fn list_streaking_users(&self) -> Result<Vec<User>, AppError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::Database("Injected listing failure".to_string()));
        }
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.current_streak > 0)
            .map(|u| u.value().clone())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), AppError> {
        self.check_user_update(user_id)?;
        if let Some(mut user) = self.users.get_mut(user_id) {
            patch.apply_to(&mut user);
        }
        Ok(())
    }

    async fn update_users(&self, updates: &[(String, UserPatch)]) -> Result<(), AppError> {
        self.check_batch()?;
        // All-or-nothing: validate every row before applying any.
        for (user_id, _) in updates {
            self.check_user_update(user_id)?;
        }
        for (user_id, patch) in updates {
            if let Some(mut user) = self.users.get_mut(user_id) {
                patch.apply_to(&mut user);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StreakLedger for MemoryStore {
    async fn upsert_day(&self, day: &StreakDay) -> Result<UpsertOutcome, AppError> {
        self.check_ledger_write(day)?;
        Ok(self.write_day(day))
    }

    async fn upsert_days(&self, days: &[StreakDay]) -> Result<Vec<UpsertOutcome>, AppError> {
        self.check_batch()?;
        for day in days {
            self.check_ledger_write(day)?;
        }
        Ok(days.iter().map(|day| self.write_day(day)).collect())
    }

    async fn insert_paid_freeze(&self, day: &StreakDay) -> Result<UpsertOutcome, AppError> {
        self.check_paid_freeze(day)?;
        Ok(self.write_paid_freeze(day))
    }

    async fn insert_paid_freezes(
        &self,
        days: &[StreakDay],
    ) -> Result<Vec<UpsertOutcome>, AppError> {
        self.check_batch()?;
        for day in days {
            self.check_paid_freeze(day)?;
        }
        Ok(days.iter().map(|day| self.write_paid_freeze(day)).collect())
    }

    async fn get_days(
        &self,
        user_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError> {
        Ok(self.collect_days(|uid, day| uid == user_id && day >= since && day <= until))
    }

    async fn get_recent_days(
        &self,
        user_ids: &[String],
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError> {
        self.batch_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.collect_days(|uid, day| {
            day >= since && day <= until && user_ids.iter().any(|id| id == uid)
        }))
    }
}
