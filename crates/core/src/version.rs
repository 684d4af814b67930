// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DSL version and migration records.

use crate::context::Bag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lifecycle of a deployed DSL version.
///
/// At most one version is `active` at any instant; `draining` versions
/// accept no new runs while in-flight runs finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Active,
    Draining,
    Archived,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionStatus::Active => "active",
            VersionStatus::Draining => "draining",
            VersionStatus::Archived => "archived",
        };
        write!(f, "{}", name)
    }
}

/// A deployed DSL generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslVersion {
    pub version_id: String,
    pub deployed_at: DateTime<Utc>,
    pub dsl_hash: String,
    /// Project manifest, opaque to the engine
    pub manifest: Bag,
    pub status: VersionStatus,
}

/// Status of a version migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStatus::InProgress => "in_progress",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", name)
    }
}

/// One row of the linear migration history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Autoincrementing id (1-based)
    pub id: u64,
    pub from_version: Option<String>,
    pub to_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: MigrationStatus,
    pub runs_drained: u64,
    pub runs_remaining: u64,
}

/// Composite status returned by `check_migration_status`: the stored row
/// plus a fresh count of runs still bound to the old version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    pub status: MigrationStatus,
    pub from_version: Option<String>,
    pub to_version: String,
    pub runs_remaining: u64,
    pub runs_drained: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Deterministic hash over named DSL sources.
///
/// Sources are sorted by name so file ordering does not change the hash.
/// Returns the first 16 hex characters of the SHA-256 digest.
pub fn compute_version_hash<'a>(sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut sorted: Vec<(&str, &str)> = sources.into_iter().collect();
    sorted.sort_by_key(|(name, _)| *name);

    let mut hasher = Sha256::new();
    for (name, content) in sorted {
        hasher.update(format!("{}:{}", name, content).as_bytes());
    }
    let digest = hasher.finalize();
    format!("{:x}", digest)[..16].to_string()
}

/// Generate a version id like `v20250115_143022_abc12345`.
pub fn generate_version_id(dsl_hash: &str, prefix: &str, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    format!("{}{}_{}", prefix, timestamp, crate::id::ShortId::short(dsl_hash, 8))
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
