// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod streak;
pub mod user;

pub use streak::{
    AtRiskUser, DayKind, FinalizeOutcome, StreakDay, StreakStatus, SweepAction, SweepFailure,
    SweepReport, UpsertOutcome, UserSweepOutcome,
};
pub use user::{User, UserPatch, UserRef};
