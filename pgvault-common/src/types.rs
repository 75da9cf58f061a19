use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// How often a backup recurs. `Manual` backups are requested through the API
/// and are exempt from retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Manual,
}

impl Cadence {
    /// The cadences the scheduler fires on the wall clock, in trigger order.
    pub const SCHEDULED: [Cadence; 4] = [
        Cadence::Hourly,
        Cadence::Daily,
        Cadence::Weekly,
        Cadence::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Manual => "manual",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Cadence::Hourly),
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            "manual" => Ok(Cadence::Manual),
            invalid => Err(ParseError::InvalidCadence(invalid.to_owned())),
        }
    }
}

/// Enumeration of the kinds of work a job can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobType {
    /// Dump one database of one instance and upload the artifact.
    Backup,
    /// Feed a completed backup's artifact into `psql` on a target instance.
    Restore,
    /// Trim old artifacts under one (instance, cadence) prefix.
    Cleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Backup => "backup",
            JobType::Restore => "restore",
            JobType::Cleanup => "cleanup",
        }
    }

    /// Restores are not retried automatically; everything else gets three
    /// attempts.
    pub fn default_max_retries(&self) -> i32 {
        match self {
            JobType::Restore => 1,
            JobType::Backup | JobType::Cleanup => 3,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backup" => Ok(JobType::Backup),
            "restore" => Ok(JobType::Restore),
            "cleanup" => Ok(JobType::Cleanup),
            invalid => Err(ParseError::InvalidJobType(invalid.to_owned())),
        }
    }
}

/// Enumeration of possible statuses for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue to be picked up by a worker.
    Pending,
    /// Claimed by exactly one worker and currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully with no attempts remaining.
    Failed,
    /// Failed with attempts remaining; eligible again once its backoff
    /// deadline passes.
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            invalid => Err(ParseError::InvalidJobStatus(invalid.to_owned())),
        }
    }
}

/// Enumeration of possible statuses for a backup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "in_progress" => Ok(BackupStatus::InProgress),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            invalid => Err(ParseError::InvalidBackupStatus(invalid.to_owned())),
        }
    }
}

/// SSL negotiation mode used when connecting to a registered instance.
/// Passed to the external tools through `PGSSLMODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            invalid => Err(ParseError::InvalidSslMode(invalid.to_owned())),
        }
    }
}

/// Severity of a structured log row. Stored uppercase to match the check
/// constraint on `logs.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_round_trips_through_str() {
        for cadence in [
            Cadence::Hourly,
            Cadence::Daily,
            Cadence::Weekly,
            Cadence::Monthly,
            Cadence::Manual,
        ] {
            assert_eq!(cadence.as_str().parse::<Cadence>().unwrap(), cadence);
        }
        assert!("yearly".parse::<Cadence>().is_err());
    }

    #[test]
    fn scheduled_cadences_exclude_manual() {
        assert!(!Cadence::SCHEDULED.contains(&Cadence::Manual));
    }

    #[test]
    fn restore_jobs_do_not_retry() {
        assert_eq!(JobType::Restore.default_max_retries(), 1);
        assert_eq!(JobType::Backup.default_max_retries(), 3);
        assert_eq!(JobType::Cleanup.default_max_retries(), 3);
    }

    #[test]
    fn backup_status_terminality() {
        assert!(BackupStatus::Completed.is_terminal());
        assert!(BackupStatus::Failed.is_terminal());
        assert!(!BackupStatus::Pending.is_terminal());
        assert!(!BackupStatus::InProgress.is_terminal());
    }
}
