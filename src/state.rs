// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::grading::{coordinator::GradingQueue, sandbox::ProcessSandbox};
use crate::utils::lock::AttemptLocks;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub grading: GradingQueue,
    pub attempt_locks: AttemptLocks,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        Self {
            pool,
            config,
            grading: GradingQueue::new(),
            attempt_locks: AttemptLocks::default(),
        }
    }

    /// Starts the grading workers with the configured process sandbox.
    pub fn start_grading_workers(&self) -> Vec<JoinHandle<()>> {
        let runner = Arc::new(ProcessSandbox::new(&self.config.sandbox));
        self.grading
            .spawn_workers(self.pool.clone(), runner, self.config.grading.clone())
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for GradingQueue {
    fn from_ref(state: &AppState) -> Self {
        state.grading.clone()
    }
}

impl FromRef<AppState> for AttemptLocks {
    fn from_ref(state: &AppState) -> Self {
        state.attempt_locks.clone()
    }
}
