// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily streak service.
//!
//! Handles the finish-activity workflow:
//! 1. Resolve the user and their local "today"
//! 2. Read the recent ledger
//! 3. Either reconcile (today already counted) or extend the streak
//! 4. Write the ledger row, then the counters
//!
//! The ledger is the source of truth. Counters are only written after the
//! ledger row is confirmed, so they never claim a day the ledger lacks.

use crate::config::StreakConfig;
use crate::db::{StreakLedger, UserDirectory};
use crate::error::{AppError, Result};
use crate::models::{
    AtRiskUser, DayKind, FinalizeOutcome, StreakDay, StreakStatus, UpsertOutcome, User,
    UserPatch, UserRef,
};
use crate::services::chain::{bridged_chain, DayLedger};
use crate::time_utils::{day_before, days_before, resolve_local_day, DayZone};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hard limit on how far back a chain is followed.
const MAX_CHAIN_SCAN_DAYS: u64 = 3650;

/// Per-user locks serialising finalize calls within this instance.
///
/// An entry lives only while a finalize for that user holds or awaits it.
pub type UserLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// A completed learning activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinishedActivity {
    /// All answers correct
    pub perfect: bool,
    /// Time spent on the activity
    pub study_seconds: Option<u32>,
}

/// Streak operations over injected stores.
#[derive(Clone)]
pub struct StreakService {
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) ledger: Arc<dyn StreakLedger>,
    pub(crate) config: StreakConfig,
    locks: UserLocks,
}

impl StreakService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn StreakLedger>,
        config: StreakConfig,
    ) -> Self {
        Self {
            users,
            ledger,
            config,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &StreakConfig {
        &self.config
    }

    /// Record a finished activity and update the user's streak.
    ///
    /// Calling this twice on the same local day does not count the day twice.
    pub async fn finalize_activity(
        &self,
        user_ref: &UserRef,
        activity: &FinishedActivity,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let user_id = self.load_user(user_ref).await?.id;

        let lock = self
            .locks
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;
        let result = self.finalize_locked(&user_id, activity, now).await;
        drop(guard);

        // Two references left means the map and us: nobody else is waiting.
        self.locks.remove_if(&user_id, |_, l| Arc::strong_count(l) == 2);
        result
    }

    async fn finalize_locked(
        &self,
        user_id: &str,
        activity: &FinishedActivity,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        // Re-read under the lock so counters reflect any call we waited on.
        let user = self.load_user(&UserRef::Id(user_id.to_string())).await?;
        let today = resolve_local_day(now, user.timezone.as_deref()).day;
        let window_start = days_before(today, u64::from(self.config.lookback_days));

        let rows = self.ledger.get_days(&user.id, window_start, today).await?;
        let mut ledger = DayLedger::from_rows(&rows);

        let counted_today = match ledger.kind_on(today) {
            Some(DayKind::Active) => false,
            Some(DayKind::Freeze) => {
                return Err(AppError::DayConflict {
                    day: today,
                    existing: DayKind::Freeze,
                })
            }
            None => {
                let row = StreakDay::new(user.id.clone(), today, DayKind::Active);
                let outcome = self.ledger.upsert_day(&row).await.map_err(|e| {
                    tracing::error!(user_id = %user.id, day = %today, error = %e, "Ledger write failed");
                    AppError::LedgerWriteFailed(e.to_string())
                })?;
                match outcome {
                    UpsertOutcome::Inserted => true,
                    UpsertOutcome::Unchanged => {
                        tracing::debug!(user_id = %user.id, day = %today, "Day written concurrently");
                        false
                    }
                    UpsertOutcome::Conflict { existing } => {
                        return Err(AppError::DayConflict {
                            day: today,
                            existing,
                        })
                    }
                }
            }
        };
        ledger.insert(today, DayKind::Active);

        let current_streak = self
            .chain_ending_at(&user.id, &mut ledger, today, window_start)
            .await?;
        let max_streak = user.max_streak.max(current_streak);
        let perfect_delta = u32::from(activity.perfect);

        // Increments, so another instance's concurrent finalize is not lost.
        let patch = UserPatch {
            current_streak: Some(current_streak),
            max_streak: Some(current_streak),
            perfect_count_delta: perfect_delta,
            study_seconds_delta: u64::from(activity.study_seconds.unwrap_or(0)),
            last_active_at: Some(now),
            ..Default::default()
        };

        self.users.update_user(&user.id, &patch).await.map_err(|e| {
            tracing::error!(
                user_id = %user.id,
                day = %today,
                current_streak,
                error = %e,
                "Ledger written but counters not updated"
            );
            AppError::CounterUpdateFailed(e.to_string())
        })?;

        tracing::info!(
            user_id = %user.id,
            day = %today,
            current_streak,
            max_streak,
            counted_today,
            "Activity finalized"
        );

        Ok(FinalizeOutcome {
            user_id: user.id,
            day: today,
            current_streak,
            max_streak,
            perfect_count: user.perfect_count.saturating_add(perfect_delta),
            last_active_at: now,
            counted_today,
        })
    }

    /// Current streak state plus recent ledger rows.
    pub async fn streak_status(&self, user_ref: &UserRef, now: DateTime<Utc>) -> Result<StreakStatus> {
        let user = self.load_user(user_ref).await?;
        let today = resolve_local_day(now, user.timezone.as_deref()).day;
        let history = u64::from(self.config.history_days.max(1));
        let since = days_before(today, history - 1);

        let days = self.ledger.get_days(&user.id, since, today).await?;
        let today_done = days
            .iter()
            .any(|d| d.day == today && d.kind == DayKind::Active);

        Ok(StreakStatus {
            is_subscriber: user.is_subscriber(now),
            user_id: user.id,
            today,
            current_streak: user.current_streak,
            max_streak: user.max_streak,
            freeze_tokens: user.freeze_tokens,
            today_done,
            days,
        })
    }

    /// Users with a live streak, nothing recorded for their local today, and a
    /// local hour at or past the reminder hour.
    pub async fn at_risk_users(&self, now: DateTime<Utc>) -> Result<Vec<AtRiskUser>> {
        let candidates: Vec<(User, NaiveDate)> = self
            .users
            .list_streaking_users()
            .await?
            .into_iter()
            .filter_map(|user| {
                let zone = DayZone::from_setting(user.timezone.as_deref());
                if zone.local_hour(now) < self.config.reminder_hour {
                    return None;
                }
                let today = zone.local_date(now);
                Some((user, today))
            })
            .collect();

        let (Some(since), Some(until)) = (
            candidates.iter().map(|(_, d)| *d).min(),
            candidates.iter().map(|(_, d)| *d).max(),
        ) else {
            return Ok(Vec::new());
        };

        let mut recorded: HashMap<String, DayLedger> = HashMap::new();
        let ids: Vec<String> = candidates.iter().map(|(u, _)| u.id.clone()).collect();
        for chunk in ids.chunks(self.config.batch_size.max(1)) {
            for row in self.ledger.get_recent_days(chunk, since, until).await? {
                recorded
                    .entry(row.user_id.clone())
                    .or_default()
                    .insert(row.day, row.kind);
            }
        }

        Ok(candidates
            .into_iter()
            .filter(|(user, today)| {
                recorded
                    .get(&user.id)
                    .and_then(|l| l.kind_on(*today))
                    .is_none()
            })
            .map(|(user, today)| AtRiskUser {
                is_subscriber: user.is_subscriber(now),
                telegram_id: user.telegram_id,
                today,
                current_streak: user.current_streak,
                freeze_tokens: user.freeze_tokens,
                user_id: user.id,
            })
            .collect())
    }

    pub(crate) async fn load_user(&self, user_ref: &UserRef) -> Result<User> {
        self.users
            .get_user(user_ref)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_ref.to_string()))
    }

    /// Freeze-bridged chain ending at `ending_at`, reading older ledger rows
    /// while the walk runs off the start of the loaded window.
    async fn chain_ending_at(
        &self,
        user_id: &str,
        ledger: &mut DayLedger,
        ending_at: NaiveDate,
        mut window_start: NaiveDate,
    ) -> Result<u32> {
        let floor = days_before(ending_at, MAX_CHAIN_SCAN_DAYS);
        let step = u64::from(self.config.lookback_days);
        let mut walk = bridged_chain(ledger, ending_at, window_start);

        while walk.open_ended && window_start > floor {
            let until = day_before(window_start);
            let since = days_before(window_start, step).max(floor);
            let older = self.ledger.get_days(user_id, since, until).await?;
            tracing::debug!(
                user_id,
                since = %since,
                rows = older.len(),
                "Extending ledger window"
            );
            ledger.extend(&older);
            window_start = since;
            walk = bridged_chain(ledger, ending_at, window_start);
        }

        Ok(walk.length)
    }
}
