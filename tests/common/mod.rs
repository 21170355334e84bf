// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use streak_engine::config::Config;
use streak_engine::db::{FirestoreDb, MemoryStore, UserDirectory};
use streak_engine::error::AppError;
use streak_engine::models::{User, UserPatch, UserRef};
use streak_engine::routes::create_router;
use streak_engine::services::StreakService;
use streak_engine::AppState;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app over a fresh memory store.
/// Returns the router, the shared state, and the store for setup/inspection.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(
        Config::test_default(),
        store.clone(),
        store.clone(),
    ));
    (create_router(state.clone()), state, store)
}

/// Streak service over a fresh memory store with default tunables.
#[allow(dead_code)]
pub fn test_service() -> (StreakService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = Config::test_default();
    let service = StreakService::new(store.clone(), store.clone(), config.streak);
    (service, store)
}

#[allow(dead_code)]
pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("Invalid test date")
}

/// Parse an RFC 3339 instant.
#[allow(dead_code)]
pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("Invalid test timestamp")
        .with_timezone(&Utc)
}

/// Noon UTC on `day` (15:00 at the default +03:00 offset).
#[allow(dead_code)]
pub fn noon(day: &str) -> DateTime<Utc> {
    date(day)
        .and_hms_opt(12, 0, 0)
        .expect("Invalid test time")
        .and_utc()
}

/// A user with a live streak.
#[allow(dead_code)]
pub fn streaking_user(id: &str, current_streak: u32, freeze_tokens: u32) -> User {
    let mut user = User::new(id);
    user.current_streak = current_streak;
    user.max_streak = current_streak;
    user.freeze_tokens = freeze_tokens;
    user
}

/// Make `user` a subscriber as of `now`.
#[allow(dead_code)]
pub fn subscribed(mut user: User, now: DateTime<Utc>) -> User {
    user.subscription_active_until = Some(now + chrono::Duration::days(30));
    user
}

/// User directory over a memory store where another writer commits one patch
/// between our read and our write, the way a second instance would.
///
/// The patch lands right after the next listing, or right before the next
/// update, whichever comes first.
#[allow(dead_code)]
pub struct InterleavingDirectory {
    store: Arc<MemoryStore>,
    interleaved: Mutex<Option<(String, UserPatch)>>,
}

#[allow(dead_code)]
impl InterleavingDirectory {
    pub fn new(store: Arc<MemoryStore>, user_id: &str, patch: UserPatch) -> Self {
        Self {
            store,
            interleaved: Mutex::new(Some((user_id.to_string(), patch))),
        }
    }

    async fn interleave(&self) -> Result<(), AppError> {
        let next = self.interleaved.lock().expect("Poisoned lock").take();
        if let Some((user_id, patch)) = next {
            self.store.update_user(&user_id, &patch).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InterleavingDirectory {
    async fn get_user(&self, user: &UserRef) -> Result<Option<User>, AppError> {
        self.store.get_user(user).await
    }

    async fn list_streaking_users(&self) -> Result<Vec<User>, AppError> {
        let users = self.store.list_streaking_users().await?;
        self.interleave().await?;
        Ok(users)
    }

    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), AppError> {
        self.interleave().await?;
        self.store.update_user(user_id, patch).await
    }

    async fn update_users(&self, updates: &[(String, UserPatch)]) -> Result<(), AppError> {
        self.interleave().await?;
        self.store.update_users(updates).await
    }
}
