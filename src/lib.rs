// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Streak Engine: daily learning streaks with freezes
//!
//! This crate provides the backend API that records finished lessons as
//! per-day ledger rows, keeps each learner's streak counters in step with the
//! ledger, and runs the nightly sweep that spends freezes or resets streaks.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::{Config, StoreBackend};
use db::{FirestoreDb, MemoryStore, StreakLedger, UserDirectory};
use error::AppError;
use services::StreakService;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub streaks: StreakService,
}

impl AppState {
    /// Wire the streak service over already-built stores.
    pub fn new(
        config: Config,
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn StreakLedger>,
    ) -> Self {
        let streaks = StreakService::new(users, ledger, config.streak.clone());
        Self { config, streaks }
    }

    /// Connect the configured store backend.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        match config.store_backend {
            StoreBackend::Firestore => {
                let db = Arc::new(FirestoreDb::new(&config.gcp_project_id).await?);
                Ok(Self::new(config, db.clone(), db))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                let store = Arc::new(MemoryStore::new());
                Ok(Self::new(config, store.clone(), store))
            }
        }
    }
}
