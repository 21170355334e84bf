// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Nightly reset/freeze sweep over the memory store.

use std::sync::Arc;
use streak_engine::config::StreakConfig;
use streak_engine::db::MemoryStore;
use streak_engine::models::{DayKind, SweepAction, UserPatch};
use streak_engine::services::StreakService;

mod common;
use common::{date, noon, streaking_user, subscribed, test_service, InterleavingDirectory};

/// Local today is 2024-01-05 for users on the default offset.
const TODAY: &str = "2024-01-05";
const YESTERDAY: &str = "2024-01-04";

fn action_for(report: &streak_engine::models::SweepReport, user_id: &str) -> Option<SweepAction> {
    report
        .outcomes
        .iter()
        .find(|o| o.user_id == user_id)
        .map(|o| o.action)
}

#[tokio::test]
async fn test_subscriber_gets_free_freeze() {
    let (service, store) = test_service();
    let now = noon(TODAY);
    store.insert_user(subscribed(streaking_user("sub", 5, 0), now));
    store.seed_day("sub", date("2024-01-03"), DayKind::Active);

    let report = service.run_nightly_sweep(now).await.unwrap();

    assert_eq!(action_for(&report, "sub"), Some(SweepAction::GraceFreeze));
    assert_eq!(report.freeze_count, 1);
    assert_eq!(report.tokens_spent, 0);
    let user = store.user("sub").unwrap();
    assert_eq!(user.freeze_tokens, 0);
    assert_eq!(user.current_streak, 5);
    assert_eq!(
        store.days_for("sub").last().map(|d| (d.day, d.kind)),
        Some((date(YESTERDAY), DayKind::Freeze))
    );
}

#[tokio::test]
async fn test_subscriber_past_allowance_spends_token() {
    let (service, store) = test_service();
    let now = noon(TODAY);
    store.insert_user(subscribed(streaking_user("sub", 5, 1), now));
    store.seed_day("sub", date("2024-01-02"), DayKind::Freeze);
    store.seed_day("sub", date("2024-01-03"), DayKind::Freeze);

    let report = service.run_nightly_sweep(now).await.unwrap();

    assert_eq!(action_for(&report, "sub"), Some(SweepAction::TokenFreeze));
    assert_eq!(report.tokens_spent, 1);
    assert_eq!(store.user("sub").unwrap().freeze_tokens, 0);
    assert_eq!(store.days_for("sub").len(), 3);
}

#[tokio::test]
async fn test_subscriber_past_allowance_without_tokens_resets() {
    let (service, store) = test_service();
    let now = noon(TODAY);
    store.insert_user(subscribed(streaking_user("sub", 5, 0), now));
    store.seed_day("sub", date("2024-01-02"), DayKind::Freeze);
    store.seed_day("sub", date("2024-01-03"), DayKind::Freeze);

    let report = service.run_nightly_sweep(now).await.unwrap();

    assert_eq!(action_for(&report, "sub"), Some(SweepAction::Reset));
    let user = store.user("sub").unwrap();
    assert_eq!(user.current_streak, 0);
    assert_eq!(user.max_streak, 5);
    assert_eq!(store.days_for("sub").len(), 2);
}

#[tokio::test]
async fn test_non_subscriber_paths() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("broke", 3, 0));
    store.insert_user(streaking_user("saver", 3, 2));

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(action_for(&report, "broke"), Some(SweepAction::Reset));
    assert_eq!(store.user("broke").unwrap().current_streak, 0);
    assert!(store.days_for("broke").is_empty());

    assert_eq!(action_for(&report, "saver"), Some(SweepAction::TokenFreeze));
    let saver = store.user("saver").unwrap();
    assert_eq!(saver.freeze_tokens, 1);
    assert_eq!(saver.current_streak, 3);

    assert_eq!(report.reset_count, 1);
    assert_eq!(report.freeze_count, 1);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_active_yesterday_is_left_alone() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("u1", 2, 1));
    store.seed_day("u1", date(YESTERDAY), DayKind::Active);

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(action_for(&report, "u1"), Some(SweepAction::AlreadyResolved));
    assert_eq!(report.skipped_count, 1);
    assert_eq!(store.user("u1").unwrap().freeze_tokens, 1);
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let (service, store) = test_service();
    let now = noon(TODAY);
    store.insert_user(streaking_user("saver", 3, 2));
    store.insert_user(subscribed(streaking_user("sub", 3, 0), now));
    store.insert_user(streaking_user("broke", 3, 0));

    let first = service.run_nightly_sweep(now).await.unwrap();
    let after_first: Vec<_> = ["saver", "sub", "broke"]
        .iter()
        .map(|id| store.user(id).unwrap())
        .collect();

    let second = service.run_nightly_sweep(now).await.unwrap();

    assert_eq!(first.tokens_spent, 1);
    assert_eq!(second.tokens_spent, 0);
    assert_eq!(second.freeze_count, 0);
    assert_eq!(second.reset_count, 0);
    // The reset user no longer has a live streak and drops out of the sweep.
    assert_eq!(second.skipped_count, 2);
    let after_second: Vec<_> = ["saver", "sub", "broke"]
        .iter()
        .map(|id| store.user(id).unwrap())
        .collect();
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_failed_freeze_keeps_token_and_others_proceed() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("stuck", 4, 1));
    store.insert_user(streaking_user("fine", 4, 1));
    store.fail_ledger_writes_for("stuck");

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].user_id, "stuck");
    let stuck = store.user("stuck").unwrap();
    assert_eq!(stuck.freeze_tokens, 1);
    assert_eq!(stuck.current_streak, 4);
    assert!(store.days_for("stuck").is_empty());

    assert_eq!(action_for(&report, "fine"), Some(SweepAction::TokenFreeze));
    assert_eq!(store.user("fine").unwrap().freeze_tokens, 0);
}

#[tokio::test]
async fn test_failed_reset_is_reported() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("a", 4, 0));
    store.insert_user(streaking_user("b", 4, 0));
    store.fail_user_updates_for("a");

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(report.reset_count, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].user_id, "a");
    assert_eq!(store.user("a").unwrap().current_streak, 4);
    assert_eq!(store.user("b").unwrap().current_streak, 0);
}

#[tokio::test]
async fn test_token_granted_during_sweep_is_kept() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(streaking_user("u1", 3, 1));
    // A purchase lands after the sweep has listed users
    let grant = UserPatch {
        freeze_tokens_delta: 1,
        ..Default::default()
    };
    let users = Arc::new(InterleavingDirectory::new(store.clone(), "u1", grant));
    let service = StreakService::new(users, store.clone(), StreakConfig::default());

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(action_for(&report, "u1"), Some(SweepAction::TokenFreeze));
    assert_eq!(report.tokens_spent, 1);
    // 1 held + 1 granted - 1 spent
    assert_eq!(store.user("u1").unwrap().freeze_tokens, 1);
}

#[tokio::test]
async fn test_unpaid_freeze_is_charged_on_rerun() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("u1", 3, 1));
    store.fail_user_updates_for("u1");

    let first = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(first.failures.len(), 1);
    assert!(first.failures[0].retryable);
    // Neither the freeze nor the spend was written
    assert!(store.days_for("u1").is_empty());
    assert_eq!(store.user("u1").unwrap().freeze_tokens, 1);

    store.heal();
    let second = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(action_for(&second, "u1"), Some(SweepAction::TokenFreeze));
    assert_eq!(second.tokens_spent, 1);
    let user = store.user("u1").unwrap();
    assert_eq!(user.freeze_tokens, 0);
    assert_eq!(user.current_streak, 3);
    assert_eq!(
        store.days_for("u1").last().map(|d| (d.day, d.kind)),
        Some((date(YESTERDAY), DayKind::Freeze))
    );

    let third = service.run_nightly_sweep(noon(TODAY)).await.unwrap();
    assert_eq!(third.tokens_spent, 0);
    assert_eq!(store.user("u1").unwrap().freeze_tokens, 0);
}

#[tokio::test]
async fn test_token_spent_elsewhere_is_not_overdrawn() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(streaking_user("u1", 3, 1));
    // The last token is spent after the sweep has listed users
    let spend = UserPatch {
        freeze_tokens_delta: -1,
        ..Default::default()
    };
    let users = Arc::new(InterleavingDirectory::new(store.clone(), "u1", spend));
    let service = StreakService::new(users, store.clone(), StreakConfig::default());

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(report.tokens_spent, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.starts_with("freeze not recorded"));
    assert!(store.days_for("u1").is_empty());
    assert_eq!(store.user("u1").unwrap().freeze_tokens, 0);
}

#[tokio::test]
async fn test_batch_failures_fall_back_to_rows() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("saver", 3, 2));
    store.insert_user(streaking_user("broke", 3, 0));
    store.set_fail_batches(true);

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(store.user("saver").unwrap().freeze_tokens, 1);
    assert_eq!(store.user("broke").unwrap().current_streak, 0);
}

#[tokio::test]
async fn test_listing_failure_fails_the_sweep() {
    let (service, store) = test_service();
    store.insert_user(streaking_user("u1", 3, 0));
    store.set_fail_listing(true);

    assert!(service.run_nightly_sweep(noon(TODAY)).await.is_err());
    assert_eq!(store.user("u1").unwrap().current_streak, 3);
}

#[tokio::test]
async fn test_ledger_reads_are_batched() {
    let store = Arc::new(MemoryStore::new());
    let config = StreakConfig {
        batch_size: 2,
        ..Default::default()
    };
    let service = StreakService::new(store.clone(), store.clone(), config);
    for i in 0..5 {
        store.insert_user(streaking_user(&format!("u{}", i), 1, 0));
    }

    let report = service.run_nightly_sweep(noon(TODAY)).await.unwrap();

    assert_eq!(store.batch_read_count(), 3);
    assert_eq!(report.reset_count, 5);
}

#[tokio::test]
async fn test_yesterday_follows_user_timezone() {
    let (service, store) = test_service();
    let mut user = streaking_user("tokyo", 2, 1);
    user.timezone = Some("Asia/Tokyo".to_string());
    store.insert_user(user);
    // 01:00 on Jan 6 in Tokyo: yesterday there is Jan 5
    store.seed_day("tokyo", date("2024-01-04"), DayKind::Active);

    let report = service
        .run_nightly_sweep(common::at("2024-01-05T16:00:00Z"))
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.day, date("2024-01-05"));
    assert_eq!(outcome.action, SweepAction::TokenFreeze);
    assert_eq!(outcome.tokens_after, 0);
}
