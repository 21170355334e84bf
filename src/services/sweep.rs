// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Nightly reset/freeze sweep.
//!
//! For every user with a live streak, decides whether their local yesterday
//! is bridged by a freeze or ends the streak:
//! - yesterday already has a ledger row: nothing to do
//! - subscriber with fewer than the free-freeze allowance in a row: free freeze
//! - otherwise a freeze token pays for the freeze
//! - otherwise the streak resets to zero
//!
//! Re-running the sweep for the same night is a no-op because every resolved
//! user then has a row for yesterday. A paid freeze row and its token
//! decrement commit together, so a failed write leaves the user unresolved
//! and the next run charges them.

use crate::config::MAX_BATCH_SIZE;
use crate::db::batch::{apply_with_row_fallback, BatchReport};
use crate::error::{AppError, Result};
use crate::models::{
    DayKind, StreakDay, SweepAction, SweepReport, UpsertOutcome, User, UserPatch,
    UserSweepOutcome,
};
use crate::services::chain::{freeze_run_before, DayLedger};
use crate::services::StreakService;
use crate::time_utils::{day_before, days_before, resolve_local_day};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

/// Ledger days read before yesterday.
const MIN_SWEEP_LOOKBACK_DAYS: u32 = 2;

/// What the sweep should do for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDecision {
    AlreadyResolved,
    GraceFreeze,
    TokenFreeze,
    Reset,
}

/// Decide yesterday's fate for one user. Pure.
pub fn decide(
    user: &User,
    ledger: &DayLedger,
    yesterday: NaiveDate,
    now: DateTime<Utc>,
    free_freezes: u32,
) -> SweepDecision {
    if ledger.kind_on(yesterday).is_some() {
        return SweepDecision::AlreadyResolved;
    }

    let freeze_run = freeze_run_before(ledger, yesterday, free_freezes);
    if user.is_subscriber(now) && freeze_run < free_freezes {
        SweepDecision::GraceFreeze
    } else if user.freeze_tokens > 0 {
        SweepDecision::TokenFreeze
    } else {
        SweepDecision::Reset
    }
}

/// A user the sweep must act on.
#[derive(Debug, Clone)]
struct Pending {
    user: User,
    yesterday: NaiveDate,
    decision: SweepDecision,
}

impl Pending {
    fn outcome(&self, action: SweepAction, streak_after: u32, tokens_after: u32) -> UserSweepOutcome {
        UserSweepOutcome {
            user_id: self.user.id.clone(),
            day: self.yesterday,
            action,
            streak_before: self.user.current_streak,
            streak_after,
            tokens_before: self.user.freeze_tokens,
            tokens_after,
        }
    }
}

impl StreakService {
    /// Resolve yesterday for every user with a live streak.
    ///
    /// Fails only if the user population cannot be listed; per-user failures
    /// are recorded in the report and the sweep carries on.
    pub async fn run_nightly_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let users = self.users.list_streaking_users().await?;
        let mut report = SweepReport::default();
        let free_freezes = self.config.subscriber_free_freezes;
        let lookback = u64::from(free_freezes.max(MIN_SWEEP_LOOKBACK_DAYS));
        let batch_size = self.config.batch_size.max(1);

        tracing::info!(users = users.len(), "Starting nightly streak sweep");

        // 1. Work out each user's yesterday and read the recent ledger in batches.
        let mut pending: Vec<Pending> = Vec::new();
        for chunk in users.chunks(batch_size) {
            let yesterdays: Vec<NaiveDate> = chunk
                .iter()
                .map(|u| day_before(resolve_local_day(now, u.timezone.as_deref()).day))
                .collect();
            let (Some(oldest), Some(newest)) =
                (yesterdays.iter().min().copied(), yesterdays.iter().max().copied())
            else {
                continue;
            };
            let ids: Vec<String> = chunk.iter().map(|u| u.id.clone()).collect();

            let rows = match self
                .ledger
                .get_recent_days(&ids, days_before(oldest, lookback), newest)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(error = %e, users = ids.len(), "Failed to read ledger for sweep batch");
                    for id in ids {
                        report.record_failure(id, "ledger read failed", &e);
                    }
                    continue;
                }
            };

            let mut ledgers: HashMap<&str, DayLedger> = HashMap::new();
            for row in &rows {
                ledgers
                    .entry(row.user_id.as_str())
                    .or_default()
                    .insert(row.day, row.kind);
            }

            let empty = DayLedger::default();
            for (user, yesterday) in chunk.iter().zip(yesterdays) {
                let ledger = ledgers.get(user.id.as_str()).unwrap_or(&empty);
                let decision = decide(user, ledger, yesterday, now, free_freezes);
                pending.push(Pending {
                    user: user.clone(),
                    yesterday,
                    decision,
                });
            }
        }

        for p in pending
            .iter()
            .filter(|p| p.decision == SweepDecision::AlreadyResolved)
        {
            report.record(p.outcome(
                SweepAction::AlreadyResolved,
                p.user.current_streak,
                p.user.freeze_tokens,
            ));
        }

        // 2. Grace freezes.
        let grace: Vec<StreakDay> = pending
            .iter()
            .filter(|p| p.decision == SweepDecision::GraceFreeze)
            .map(|p| StreakDay::new(p.user.id.clone(), p.yesterday, DayKind::Freeze))
            .collect();
        let ledger = self.ledger.clone();
        let granted = apply_with_row_fallback(
            grace,
            batch_size,
            |chunk: Vec<StreakDay>| {
                let ledger = ledger.clone();
                async move { ledger.upsert_days(&chunk).await }
            },
            |row: StreakDay| {
                let ledger = ledger.clone();
                async move { ledger.upsert_day(&row).await }
            },
        )
        .await;
        record_freezes(&mut report, &pending, &granted, SweepAction::GraceFreeze);

        // 3. Paid freezes; each row commits together with its token spend.
        let paid: Vec<StreakDay> = pending
            .iter()
            .filter(|p| p.decision == SweepDecision::TokenFreeze)
            .map(|p| StreakDay::new(p.user.id.clone(), p.yesterday, DayKind::Freeze))
            .collect();
        let spent = apply_with_row_fallback(
            paid,
            batch_size.min(MAX_BATCH_SIZE / 2),
            |chunk: Vec<StreakDay>| {
                let ledger = ledger.clone();
                async move { ledger.insert_paid_freezes(&chunk).await }
            },
            |row: StreakDay| {
                let ledger = ledger.clone();
                async move { ledger.insert_paid_freeze(&row).await }
            },
        )
        .await;
        record_freezes(&mut report, &pending, &spent, SweepAction::TokenFreeze);

        // 4. Resets.
        let resets: Vec<(String, UserPatch)> = pending
            .iter()
            .filter(|p| p.decision == SweepDecision::Reset)
            .map(|p| {
                (
                    p.user.id.clone(),
                    UserPatch {
                        current_streak: Some(0),
                        ..Default::default()
                    },
                )
            })
            .collect();
        let reset_users: HashMap<&str, &Pending> = pending
            .iter()
            .filter(|p| p.decision == SweepDecision::Reset)
            .map(|p| (p.user.id.as_str(), p))
            .collect();

        let reset = self.apply_user_patches(resets, batch_size).await;
        for ((user_id, _), _) in &reset.succeeded {
            if let Some(p) = reset_users.get(user_id.as_str()) {
                report.record(p.outcome(SweepAction::Reset, 0, p.user.freeze_tokens));
            }
        }
        for ((user_id, _), e) in &reset.failed {
            tracing::error!(user_id = %user_id, error = %e, "Streak reset failed");
            report.record_failure(user_id.clone(), "reset failed", e);
        }

        tracing::info!(
            reset = report.reset_count,
            freeze = report.freeze_count,
            tokens_spent = report.tokens_spent,
            skipped = report.skipped_count,
            failed = report.failures.len(),
            degraded_batches = granted.degraded_batches + spent.degraded_batches + reset.degraded_batches,
            "Nightly streak sweep complete"
        );

        Ok(report)
    }

    async fn apply_user_patches(
        &self,
        patches: Vec<(String, UserPatch)>,
        batch_size: usize,
    ) -> BatchReport<(String, UserPatch), ()> {
        let users = self.users.clone();
        apply_with_row_fallback(
            patches,
            batch_size,
            |chunk: Vec<(String, UserPatch)>| {
                let users = users.clone();
                async move {
                    users.update_users(&chunk).await?;
                    Ok::<_, AppError>(vec![(); chunk.len()])
                }
            },
            |(user_id, patch): (String, UserPatch)| {
                let users = users.clone();
                async move { users.update_user(&user_id, &patch).await }
            },
        )
        .await
    }
}

/// Report the freeze writes of one kind.
///
/// Only an inserted row counts as `action`; an existing row means the day was
/// resolved by someone else between our read and write.
fn record_freezes(
    report: &mut SweepReport,
    pending: &[Pending],
    written: &BatchReport<StreakDay, UpsertOutcome>,
    action: SweepAction,
) {
    let by_user: HashMap<&str, &Pending> =
        pending.iter().map(|p| (p.user.id.as_str(), p)).collect();

    for (row, outcome) in &written.succeeded {
        let Some(p) = by_user.get(row.user_id.as_str()) else {
            continue;
        };
        let tokens = p.user.freeze_tokens;
        match (outcome, action) {
            (UpsertOutcome::Inserted, SweepAction::TokenFreeze) => {
                report.record(p.outcome(action, p.user.current_streak, tokens.saturating_sub(1)));
            }
            (UpsertOutcome::Inserted, _) => {
                report.record(p.outcome(action, p.user.current_streak, tokens));
            }
            _ => {
                tracing::debug!(user_id = %p.user.id, outcome = ?outcome, "Freeze raced");
                report.record(p.outcome(SweepAction::RacedFreeze, p.user.current_streak, tokens));
            }
        }
    }

    for (row, e) in &written.failed {
        let err = match e {
            AppError::EntitlementConflict(msg) => AppError::EntitlementConflict(msg.clone()),
            other => AppError::EntitlementConflict(other.to_string()),
        };
        tracing::warn!(user_id = %row.user_id, day = %row.day, error = %err, "Freeze not recorded");
        report.record_failure(row.user_id.clone(), "freeze not recorded", &err);
    }
}
