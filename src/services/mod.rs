// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - streak business logic.

pub mod chain;
pub mod streak;
pub mod sweep;

pub use chain::{bridged_chain, chain_length, DayLedger};
pub use streak::{FinishedActivity, StreakService};
pub use sweep::{decide, SweepDecision};
