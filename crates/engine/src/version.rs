// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version manager and drain watcher.
//!
//! Hard version boundaries between DSL generations: in-flight runs of
//! version V complete under V while new starts go to V+1.

use crate::{Engine, EngineError};
use dzl_core::{
    Bag, Clock, DslVersion, IdGen, MigrationProgress, MigrationRecord, MigrationStatus,
    VersionStatus,
};
use dzl_storage::ProcessStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Manages DSL version lifecycle and migrations.
pub struct VersionManager<C: Clock, G: IdGen> {
    engine: Arc<Engine<C, G>>,
}

impl<C: Clock, G: IdGen> Clone for VersionManager<C, G> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<C: Clock, G: IdGen> VersionManager<C, G> {
    pub fn new(engine: Arc<Engine<C, G>>) -> Self {
        Self { engine }
    }

    fn store(&self) -> &ProcessStore {
        self.engine.store()
    }

    /// Deploy a new DSL version as `active`. Rejects duplicate ids.
    pub fn deploy_version(
        &self,
        version_id: &str,
        dsl_hash: &str,
        manifest: Bag,
    ) -> Result<(), EngineError> {
        self.store().insert_version(DslVersion {
            version_id: version_id.to_string(),
            deployed_at: self.engine.clock().now_utc(),
            dsl_hash: dsl_hash.to_string(),
            manifest,
            status: VersionStatus::Active,
        })?;
        tracing::info!(version = version_id, "deployed version");
        Ok(())
    }

    /// The currently active DSL version, if any.
    pub fn get_current_version(&self) -> Option<String> {
        self.store().current_version()
    }

    /// Information about a specific version.
    pub fn get_version(&self, version_id: &str) -> Option<DslVersion> {
        self.store().get_version(version_id)
    }

    /// Deployed versions, newest first.
    pub fn list_versions(&self, status: Option<VersionStatus>, limit: usize) -> Vec<DslVersion> {
        self.store().list_versions(status, limit)
    }

    /// Start a migration: count active runs on the old version, mark it
    /// draining, and insert an in-progress migration row.
    pub fn start_migration(
        &self,
        from_version: &str,
        to_version: &str,
    ) -> Result<MigrationRecord, EngineError> {
        let runs_remaining = self.store().count_active_runs_by_version(from_version);
        self.store()
            .set_version_status(from_version, VersionStatus::Draining)?;
        let migration = self.store().insert_migration(
            Some(from_version),
            to_version,
            runs_remaining,
            self.engine.clock().now_utc(),
        )?;
        tracing::info!(
            from = from_version,
            to = to_version,
            runs_remaining,
            "started migration",
        );
        Ok(migration)
    }

    /// All in-progress migrations.
    pub fn get_active_migrations(&self) -> Vec<MigrationRecord> {
        self.store().migrations_in_progress()
    }

    /// Current progress of a migration, with a fresh count of runs still
    /// bound to the old version.
    pub fn check_migration_status(&self, id: u64) -> Result<MigrationProgress, EngineError> {
        let migration = self
            .store()
            .get_migration(id)
            .ok_or(EngineError::MigrationNotFound(id))?;

        let runs_remaining = match (&migration.status, &migration.from_version) {
            (MigrationStatus::InProgress, Some(from)) => {
                self.store().count_active_runs_by_version(from)
            }
            _ => migration.runs_remaining,
        };

        Ok(MigrationProgress {
            status: migration.status,
            from_version: migration.from_version,
            to_version: migration.to_version,
            runs_remaining,
            runs_drained: migration.runs_drained,
            started_at: migration.started_at,
            completed_at: migration.completed_at,
        })
    }

    /// Complete a migration: archive the old version.
    pub fn complete_migration(&self, id: u64) -> Result<(), EngineError> {
        let migration = self
            .store()
            .get_migration(id)
            .ok_or(EngineError::MigrationNotFound(id))?;

        if let Some(from) = migration.from_version.as_deref() {
            self.store().set_version_status(from, VersionStatus::Archived)?;
        }
        self.store().finish_migration(
            id,
            MigrationStatus::Completed,
            migration.runs_remaining,
            self.engine.clock().now_utc(),
        )?;
        tracing::info!(migration = id, "completed migration");
        Ok(())
    }

    /// Roll back a migration: reactivate the old version and archive the
    /// new one.
    pub fn rollback_migration(&self, id: u64) -> Result<(), EngineError> {
        let migration = self
            .store()
            .get_migration(id)
            .ok_or(EngineError::MigrationNotFound(id))?;

        if let Some(from) = migration.from_version.as_deref() {
            self.store().set_version_status(from, VersionStatus::Active)?;
        }
        self.store()
            .set_version_status(&migration.to_version, VersionStatus::Archived)?;
        self.store().finish_migration(
            id,
            MigrationStatus::RolledBack,
            migration.runs_drained,
            self.engine.clock().now_utc(),
        )?;
        tracing::info!(
            migration = id,
            to = %migration.to_version,
            from = migration.from_version.as_deref().unwrap_or(""),
            "rolled back migration",
        );
        Ok(())
    }

    /// Force-drain: suspend every active run bound to a version. Returns
    /// the number of runs suspended.
    pub async fn suspend_remaining_processes(&self, version_id: &str) -> Result<u64, EngineError> {
        let runs = self.store().active_runs_by_version(version_id);
        let mut suspended = 0u64;
        for run in runs {
            if run.status == dzl_core::RunStatus::Suspended {
                continue;
            }
            self.engine.suspend_process(&run.run_id).await?;
            suspended += 1;
        }
        tracing::info!(version = version_id, suspended, "suspended remaining processes");
        Ok(suspended)
    }
}

/// Configuration for the [`DrainWatcher`].
#[derive(Debug, Clone)]
pub struct DrainWatcherConfig {
    pub check_interval: Duration,
    pub auto_complete: bool,
}

impl Default for DrainWatcherConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            auto_complete: true,
        }
    }
}

/// Background task that completes migrations once their runs have drained.
pub struct DrainWatcher<C: Clock, G: IdGen> {
    manager: VersionManager<C, G>,
    config: DrainWatcherConfig,
}

impl<C: Clock, G: IdGen> DrainWatcher<C, G> {
    pub fn new(manager: VersionManager<C, G>, config: DrainWatcherConfig) -> Self {
        Self { manager, config }
    }

    /// One watcher pass. Returns the ids of migrations completed.
    ///
    /// Public so tests can drive the watcher without the background loop.
    pub fn check_once(&self) -> Vec<u64> {
        let mut completed = Vec::new();
        for migration in self.manager.get_active_migrations() {
            match self.manager.check_migration_status(migration.id) {
                Ok(progress) if progress.runs_remaining == 0 && self.config.auto_complete => {
                    match self.manager.complete_migration(migration.id) {
                        Ok(()) => {
                            tracing::info!(
                                migration = migration.id,
                                from = migration.from_version.as_deref().unwrap_or(""),
                                to = %migration.to_version,
                                "migration auto-completed",
                            );
                            completed.push(migration.id);
                        }
                        Err(e) => {
                            tracing::error!(migration = migration.id, error = %e, "auto-complete failed")
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(migration = migration.id, error = %e, "drain check failed"),
            }
        }
        completed
    }

    /// Spawn the watcher loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.config.check_interval).await;
                self.check_once();
            }
        })
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
