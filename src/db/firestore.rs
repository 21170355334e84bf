// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing the store traits.
//!
//! Layout:
//! - `users/{user_id}`: learner profile and streak counters
//! - `streak_days/{urlencoded user_id}_{YYYY-MM-DD}`: one ledger row per (user, day)
//!
//! Documents written by older clients use camelCase field names and RFC 3339
//! strings for timestamps. Both are adapted here so the rest of the crate only
//! sees the canonical [`User`] and [`StreakDay`] shapes.

use crate::config::MAX_BATCH_SIZE;
use crate::db::{collections, keep_first, StreakLedger, UserDirectory};
use crate::error::AppError;
use crate::models::user::clamp_tokens;
use crate::models::{DayKind, StreakDay, UpsertOutcome, User, UserPatch, UserRef};
use crate::time_utils::{format_day, format_utc_rfc3339, parse_day, parse_utc_rfc3339};
use async_trait::async_trait;
use chrono::NaiveDate;
use firestore::errors::FirestoreError;
use firestore::document_transform_builder::FirestoreTransformBuilder;
use firestore::{FirestoreFieldTransform, FirestoreTransaction, FirestoreWritePrecondition};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};

const MAX_CONCURRENT_DB_OPS: usize = 50;
// Firestore caps `in` filters at 30 values.
const MAX_IN_FILTER_VALUES: usize = 30;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client; every operation returns an error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Create or replace a full user document.
    pub async fn set_user(&self, user: &User) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(&UserDocument::from(user))
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, AppError> {
        let doc: Option<UserDocument> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(doc.map(|d| d.into_user(user_id)))
    }

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>, AppError> {
        let docs: Vec<UserDocument> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(|q| q.for_all([q.field("telegram_id").eq(telegram_id)]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(docs.into_iter().next().and_then(|doc| {
            let id = doc.doc_id.clone()?;
            Some(doc.into_user(&id))
        }))
    }

    // ─── Streak Day Operations ───────────────────────────────────

    async fn get_day_kind(&self, doc_id: &str) -> Result<Option<DayKind>, AppError> {
        let doc: Option<StreakDayDocument> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::STREAK_DAYS)
            .obj()
            .one(doc_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match doc {
            None => Ok(None),
            Some(doc) => DayKind::parse(&doc.kind).map(Some).ok_or_else(|| {
                AppError::Database(format!("Unknown day kind {:?} in {}", doc.kind, doc_id))
            }),
        }
    }

    async fn query_days(
        &self,
        user_ids: Vec<String>,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError> {
        let since = format_day(since);
        let until = format_day(until);

        let docs: Vec<StreakDayDocument> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::STREAK_DAYS)
            .filter(move |q| {
                q.for_all([
                    if user_ids.len() == 1 {
                        q.field("user_id").eq(user_ids[0].clone())
                    } else {
                        q.field("user_id").is_in(user_ids.clone())
                    },
                    q.field("day").greater_than_or_equal(since.clone()),
                    q.field("day").less_than_or_equal(until.clone()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(docs.into_iter().filter_map(StreakDayDocument::into_day).collect())
    }

    /// Queue a user patch: masked fields plus server-side counter transforms.
    fn add_user_patch(
        &self,
        transaction: &mut FirestoreTransaction<'_>,
        user_id: &str,
        patch: &UserPatch,
    ) -> Result<(), AppError> {
        let client = self.get_client()?;
        let doc = UserPatchDocument::from(patch);
        let paths = doc.field_paths();
        let transforms = |t: FirestoreTransformBuilder| counter_transforms(&t, patch);

        let queued = if paths.is_empty() {
            client
                .fluent()
                .update()
                .in_col(collections::USERS)
                .precondition(FirestoreWritePrecondition::Exists(true))
                .document_id(user_id)
                .transforms(transforms)
                .only_transform()
                .add_to_transaction(transaction)
        } else {
            client
                .fluent()
                .update()
                .fields(paths)
                .in_col(collections::USERS)
                .precondition(FirestoreWritePrecondition::Exists(true))
                .document_id(user_id)
                .transforms(transforms)
                .object(&doc)
                .add_to_transaction(transaction)
        };

        queued.map(|_| ()).map_err(|e| {
            AppError::Database(format!(
                "Failed to add update for {} to transaction: {}",
                user_id, e
            ))
        })
    }

    /// Keep-first batch write; with `paid`, every inserted row also spends one
    /// of its owner's freeze tokens in the same commit.
    async fn write_days(
        &self,
        days: &[StreakDay],
        paid: bool,
    ) -> Result<Vec<UpsertOutcome>, AppError> {
        let writes_per_row = if paid { 2 } else { 1 };
        if days.len() * writes_per_row > MAX_BATCH_SIZE {
            return Err(AppError::Database(format!(
                "Batch of {} ledger rows exceeds the {} write limit",
                days.len(),
                MAX_BATCH_SIZE
            )));
        }

        let doc_ids: Vec<String> = days
            .iter()
            .map(|d| streak_day_doc_id(&d.user_id, d.day))
            .collect();

        // `buffered` keeps input order.
        let existing: Vec<Option<DayKind>> = stream::iter(doc_ids.clone())
            .map(|id| async move { self.get_day_kind(&id).await })
            .buffered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<Option<DayKind>, AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, AppError>>()?;

        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let spend = UserPatch {
            freeze_tokens_delta: -1,
            ..Default::default()
        };
        let mut outcomes = Vec::with_capacity(days.len());
        for ((day, doc_id), existing) in days.iter().zip(&doc_ids).zip(existing) {
            let outcome = keep_first(existing, day.kind);
            if outcome == UpsertOutcome::Inserted {
                // Fails the whole commit if the row appeared since the read.
                client
                    .fluent()
                    .update()
                    .in_col(collections::STREAK_DAYS)
                    .precondition(FirestoreWritePrecondition::Exists(false))
                    .document_id(doc_id)
                    .object(&StreakDayDocument::from(day))
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add ledger row {} to transaction: {}",
                            doc_id, e
                        ))
                    })?;
                if paid {
                    self.add_user_patch(&mut transaction, &day.user_id, &spend)?;
                }
            }
            outcomes.push(outcome);
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Batch ledger write failed: {}", e)))?;

        Ok(outcomes)
    }
}

/// Server-side increments, so concurrent writers never lose each other's updates.
fn counter_transforms(
    t: &FirestoreTransformBuilder,
    patch: &UserPatch,
) -> Vec<FirestoreFieldTransform> {
    t.fields([
        patch
            .max_streak
            .and_then(|v| t.field("max_streak").maximum(i64::from(v))),
        (patch.freeze_tokens_delta != 0)
            .then(|| t.field("freeze_tokens").increment(patch.freeze_tokens_delta))
            .flatten(),
        (patch.perfect_count_delta != 0)
            .then(|| {
                t.field("perfect_count")
                    .increment(i64::from(patch.perfect_count_delta))
            })
            .flatten(),
        (patch.study_seconds_delta != 0)
            .then(|| {
                t.field("study_seconds_total")
                    .increment(i64::try_from(patch.study_seconds_delta).unwrap_or(i64::MAX))
            })
            .flatten(),
    ])
}

/// Streak day document ID; unique per (user, day).
pub fn streak_day_doc_id(user_id: &str, day: NaiveDate) -> String {
    format!("{}_{}", urlencoding::encode(user_id), format_day(day))
}

fn sort_days(rows: &mut [StreakDay]) {
    rows.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.day.cmp(&b.day)));
}

#[async_trait]
impl UserDirectory for FirestoreDb {
    async fn get_user(&self, user: &UserRef) -> Result<Option<User>, AppError> {
        match user {
            UserRef::Id(id) => self.get_user_by_id(id).await,
            UserRef::External(tg) => self.get_user_by_telegram_id(*tg).await,
        }
    }

    async fn list_streaking_users(&self) -> Result<Vec<User>, AppError> {
        let docs: Vec<UserDocument> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(|q| q.for_all([q.field("current_streak").greater_than(0)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut users: Vec<User> = docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.doc_id.clone()?;
                Some(doc.into_user(&id))
            })
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn update_user(&self, user_id: &str, patch: &UserPatch) -> Result<(), AppError> {
        self.update_users(&[(user_id.to_string(), patch.clone())])
            .await
            .map_err(|e| AppError::Database(format!("Failed to update user {}: {}", user_id, e)))
    }

    async fn update_users(&self, updates: &[(String, UserPatch)]) -> Result<(), AppError> {
        if updates.len() > MAX_BATCH_SIZE {
            return Err(AppError::Database(format!(
                "Batch of {} updates exceeds the {} write limit",
                updates.len(),
                MAX_BATCH_SIZE
            )));
        }
        if updates.iter().all(|(_, p)| p.is_empty()) {
            return Ok(());
        }

        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for (user_id, patch) in updates.iter().filter(|(_, p)| !p.is_empty()) {
            self.add_user_patch(&mut transaction, user_id, patch)?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Batch user update failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl StreakLedger for FirestoreDb {
    async fn upsert_day(&self, day: &StreakDay) -> Result<UpsertOutcome, AppError> {
        let doc_id = streak_day_doc_id(&day.user_id, day.day);

        if let Some(existing) = self.get_day_kind(&doc_id).await? {
            return Ok(keep_first(Some(existing), day.kind));
        }

        // Create-only: a concurrent writer that got there first wins.
        let created: Result<StreakDayDocument, FirestoreError> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::STREAK_DAYS)
            .document_id(&doc_id)
            .object(&StreakDayDocument::from(day))
            .execute()
            .await;

        match created {
            Ok(_) => Ok(UpsertOutcome::Inserted),
            Err(FirestoreError::DataConflictError(_)) => {
                let existing = self.get_day_kind(&doc_id).await?;
                tracing::debug!(
                    user_id = %day.user_id,
                    day = %day.day,
                    "Ledger row created concurrently"
                );
                Ok(keep_first(existing, day.kind))
            }
            Err(e) => Err(AppError::Database(format!(
                "Failed to write ledger row {}: {}",
                doc_id, e
            ))),
        }
    }

    async fn upsert_days(&self, days: &[StreakDay]) -> Result<Vec<UpsertOutcome>, AppError> {
        self.write_days(days, false).await
    }

    async fn insert_paid_freeze(&self, day: &StreakDay) -> Result<UpsertOutcome, AppError> {
        let outcomes = self.write_days(std::slice::from_ref(day), true).await;
        match outcomes {
            Ok(outcomes) => outcomes.into_iter().next().ok_or_else(|| {
                AppError::Database(format!("No outcome for ledger row of {}", day.user_id))
            }),
            // The commit fails if the row appeared after our read; report
            // what is stored now, with nothing spent.
            Err(e) => match self
                .get_day_kind(&streak_day_doc_id(&day.user_id, day.day))
                .await?
            {
                Some(existing) => Ok(keep_first(Some(existing), day.kind)),
                None => Err(e),
            },
        }
    }

    async fn insert_paid_freezes(
        &self,
        days: &[StreakDay],
    ) -> Result<Vec<UpsertOutcome>, AppError> {
        self.write_days(days, true).await
    }

    async fn get_days(
        &self,
        user_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError> {
        let mut rows = self
            .query_days(vec![user_id.to_string()], since, until)
            .await?;
        sort_days(&mut rows);
        Ok(rows)
    }

    async fn get_recent_days(
        &self,
        user_ids: &[String],
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<StreakDay>, AppError> {
        let chunks: Vec<Vec<String>> = user_ids
            .chunks(MAX_IN_FILTER_VALUES)
            .map(|chunk| chunk.to_vec())
            .collect();

        let mut rows: Vec<StreakDay> = stream::iter(chunks)
            .map(|chunk| self.query_days(chunk, since, until))
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<Vec<StreakDay>, AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, AppError>>()?
            .into_iter()
            .flatten()
            .collect();

        sort_days(&mut rows);
        Ok(rows)
    }
}

// ─── Stored Document Shapes ──────────────────────────────────────

/// `users/{id}` as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_firestore_id", default, skip_serializing)]
    doc_id: Option<String>,
    #[serde(default, alias = "telegramId")]
    telegram_id: Option<i64>,
    #[serde(default, alias = "currentStreak")]
    current_streak: u32,
    #[serde(default, alias = "maxStreak")]
    max_streak: u32,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default, alias = "subscriptionActiveUntil")]
    subscription_active_until: Option<String>,
    // Signed: concurrent spends may take the stored count below zero.
    #[serde(default, alias = "freezeTokens")]
    freeze_tokens: i64,
    #[serde(default, alias = "perfectCount")]
    perfect_count: u32,
    #[serde(default, alias = "studySecondsTotal")]
    study_seconds_total: u64,
    #[serde(default, alias = "lastActiveAt")]
    last_active_at: Option<String>,
}

impl UserDocument {
    fn into_user(self, id: &str) -> User {
        User {
            id: id.to_string(),
            telegram_id: self.telegram_id,
            current_streak: self.current_streak,
            max_streak: self.max_streak.max(self.current_streak),
            timezone: self.timezone.filter(|tz| !tz.trim().is_empty()),
            subscription_active_until: self
                .subscription_active_until
                .as_deref()
                .and_then(parse_utc_rfc3339),
            freeze_tokens: clamp_tokens(self.freeze_tokens),
            perfect_count: self.perfect_count,
            study_seconds_total: self.study_seconds_total,
            last_active_at: self.last_active_at.as_deref().and_then(parse_utc_rfc3339),
        }
    }
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            doc_id: None,
            telegram_id: user.telegram_id,
            current_streak: user.current_streak,
            max_streak: user.max_streak,
            timezone: user.timezone.clone(),
            subscription_active_until: user.subscription_active_until.map(format_utc_rfc3339),
            freeze_tokens: i64::from(user.freeze_tokens),
            perfect_count: user.perfect_count,
            study_seconds_total: user.study_seconds_total,
            last_active_at: user.last_active_at.map(format_utc_rfc3339),
        }
    }
}

/// Masked partial update of `users/{id}`; counters go through
/// [`counter_transforms`] instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserPatchDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_streak: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_active_at: Option<String>,
}

impl UserPatchDocument {
    /// Update mask: only the fields being set.
    fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.current_streak.is_some() {
            paths.push("current_streak");
        }
        if self.last_active_at.is_some() {
            paths.push("last_active_at");
        }
        paths
    }
}

impl From<&UserPatch> for UserPatchDocument {
    fn from(patch: &UserPatch) -> Self {
        Self {
            current_streak: patch.current_streak,
            last_active_at: patch.last_active_at.map(format_utc_rfc3339),
        }
    }
}

/// `streak_days/{user}_{day}` as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreakDayDocument {
    #[serde(alias = "userId")]
    user_id: String,
    #[serde(alias = "date")]
    day: String,
    #[serde(alias = "type", alias = "status")]
    kind: String,
}

impl StreakDayDocument {
    /// Canonical row, or `None` (logged) for a malformed document.
    fn into_day(self) -> Option<StreakDay> {
        let day = parse_day(&self.day);
        let kind = DayKind::parse(&self.kind);
        match (day, kind) {
            (Some(day), Some(kind)) => Some(StreakDay::new(self.user_id, day, kind)),
            _ => {
                tracing::warn!(
                    user_id = %self.user_id,
                    day = %self.day,
                    kind = %self.kind,
                    "Skipping malformed ledger row"
                );
                None
            }
        }
    }
}

impl From<&StreakDay> for StreakDayDocument {
    fn from(day: &StreakDay) -> Self {
        Self {
            user_id: day.user_id.clone(),
            day: format_day(day.day),
            kind: day.kind.as_str().to_string(),
        }
    }
}
