// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Learner record as seen by the streak engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Learner profile fields the streak engine reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user ID (also used as document ID)
    pub id: String,
    /// Telegram user ID, if the user came in through the bot
    pub telegram_id: Option<i64>,
    /// Current consecutive-day streak
    pub current_streak: u32,
    /// Best streak ever (never decreases)
    pub max_streak: u32,
    /// IANA timezone name; `None` means the default offset
    pub timezone: Option<String>,
    /// Subscriber tier is granted while this lies in the future
    pub subscription_active_until: Option<DateTime<Utc>>,
    /// Spendable freeze tokens
    pub freeze_tokens: u32,
    /// Number of perfect lessons
    pub perfect_count: u32,
    /// Accumulated study time
    pub study_seconds_total: u64,
    /// Last completed activity
    pub last_active_at: Option<DateTime<Utc>>,
}

impl User {
    /// A fresh user with no history.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            telegram_id: None,
            current_streak: 0,
            max_streak: 0,
            timezone: None,
            subscription_active_until: None,
            freeze_tokens: 0,
            perfect_count: 0,
            study_seconds_total: 0,
            last_active_at: None,
        }
    }

    /// Whether the subscription is active at `now`.
    pub fn is_subscriber(&self, now: DateTime<Utc>) -> bool {
        self.subscription_active_until
            .is_some_and(|until| until > now)
    }
}

/// How a caller identifies a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserRef {
    Id(String),
    /// Telegram user ID
    External(i64),
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Id(id) => write!(f, "{}", id),
            UserRef::External(tg) => write!(f, "tg:{}", tg),
        }
    }
}

/// Partial update of a user record.
///
/// `None` fields and zero deltas are left untouched. Counters are expressed
/// as increments so concurrent writers never overwrite each other's updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub current_streak: Option<u32>,
    /// `max_streak` is raised to at least this value, never lowered
    pub max_streak: Option<u32>,
    /// Added to `freeze_tokens`; the stored count never goes below zero
    pub freeze_tokens_delta: i64,
    pub perfect_count_delta: u32,
    pub study_seconds_delta: u64,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to an in-memory record.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = self.current_streak {
            user.current_streak = v;
        }
        if let Some(v) = self.max_streak {
            user.max_streak = user.max_streak.max(v);
        }
        user.freeze_tokens = clamp_tokens(i64::from(user.freeze_tokens) + self.freeze_tokens_delta);
        user.perfect_count = user.perfect_count.saturating_add(self.perfect_count_delta);
        user.study_seconds_total = user
            .study_seconds_total
            .saturating_add(self.study_seconds_delta);
        if let Some(v) = self.last_active_at {
            user.last_active_at = Some(v);
        }
    }
}

/// Token count as exposed to callers: a stored negative count reads as zero.
pub fn clamp_tokens(stored: i64) -> u32 {
    u32::try_from(stored.max(0)).unwrap_or(u32::MAX)
}
