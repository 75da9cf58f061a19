//! The wall-clock scheduler: fan each cadence tick out into one pending
//! Backup + Job pair per enabled (instance, database).
//!
//! The scheduler only inserts rows; workers do everything else. A unique
//! `(cadence, bucket_start)` lease makes duplicate ticks from extra worker
//! replicas no-ops, so scale-out is safe.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use pgvault_common::error::DatabaseError;
use pgvault_common::health::HealthHandle;
use pgvault_common::models::{backup, instance};
use pgvault_common::queue::{QueueError, SCHEDULED_BACKUP_PRIORITY};
use pgvault_common::types::Cadence;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;

/// Second-precision cron expressions for the four triggers.
fn cron_expression(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Hourly => "0 0 * * * *",
        Cadence::Daily => "0 0 2 * * *",
        Cadence::Weekly => "0 0 3 * * SUN",
        Cadence::Monthly => "0 0 4 1 * *",
        Cadence::Manual => unreachable!("manual backups are never scheduled"),
    }
}

fn schedule_for(cadence: Cadence) -> Schedule {
    Schedule::from_str(cron_expression(cadence)).expect("cadence cron expression is valid")
}

/// The next (cadence, fire time) across all triggers, strictly after `now`.
pub fn next_trigger(now: DateTime<Utc>) -> (Cadence, DateTime<Utc>) {
    Cadence::SCHEDULED
        .iter()
        .filter_map(|&cadence| {
            schedule_for(cadence)
                .after(&now)
                .next()
                .map(|at| (cadence, at))
        })
        .min_by_key(|&(_, at)| at)
        .expect("every cadence has a next fire time")
}

/// Run until shutdown, sleeping to each trigger and firing its tick.
pub async fn run(ctx: Arc<AppContext>, liveness: HealthHandle) {
    info!(
        "scheduler started; next hourly fire at {}",
        schedule_for(Cadence::Hourly)
            .after(&Utc::now())
            .next()
            .expect("hourly schedule has a next fire time")
    );

    while ctx.is_running() {
        let (cadence, fire_at) = next_trigger(Utc::now());
        debug!("next trigger: {} at {}", cadence, fire_at);

        // Sleep in short slices so shutdown and liveness stay responsive.
        loop {
            liveness.report_healthy();
            if !ctx.is_running() {
                return;
            }
            let remaining = fire_at - Utc::now();
            if remaining <= chrono::Duration::zero() {
                break;
            }
            let slice = remaining
                .to_std()
                .unwrap_or(Duration::from_secs(1))
                .min(Duration::from_secs(1));
            tokio::time::sleep(slice).await;
        }

        match tick(&ctx, cadence, fire_at).await {
            Ok(created) => {
                info!("{} tick created {} backup jobs", cadence, created);
            }
            Err(e) => error!("{} tick failed: {}", cadence, e),
        }
    }
}

/// One tick: take the bucket lease, then create a pending Backup and a
/// pending backup Job per enabled (instance, database).
pub async fn tick(
    ctx: &AppContext,
    cadence: Cadence,
    bucket_start: DateTime<Utc>,
) -> Result<u32, DatabaseError> {
    if !acquire_lease(&ctx.db, cadence, bucket_start).await? {
        debug!(
            "another scheduler owns the {} bucket at {}, skipping",
            cadence, bucket_start
        );
        return Ok(0);
    }

    let instances = instance::list_enabled(&ctx.db).await?;

    let mut created = 0u32;
    for inst in &instances {
        for database in &inst.databases {
            let record = match backup::create(&ctx.db, &inst.id, database, cadence).await {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        "failed to create backup record for {}/{}: {}",
                        inst.id, database, e
                    );
                    continue;
                }
            };

            match ctx
                .queue
                .add_backup_job(
                    &inst.id,
                    database,
                    cadence,
                    Some(record.id),
                    SCHEDULED_BACKUP_PRIORITY,
                )
                .await
            {
                Ok(job) => {
                    created += 1;
                    // Best-effort back-reference; the payload already links
                    // the job to the backup.
                    if let Err(e) = backup::set_job_id(&ctx.db, record.id, job.id).await {
                        warn!("failed to set job id on backup {}: {}", record.id, e);
                    }
                }
                Err(QueueError::QueueFull) => {
                    // Persisted; the loader will pick it up.
                    created += 1;
                }
                Err(e) => {
                    error!(
                        "failed to enqueue {} backup for {}/{}: {}",
                        cadence, inst.id, database, e
                    );
                }
            }
        }
    }

    metrics::counter!(
        "pgvault_scheduler_jobs_created_total",
        &[("cadence", cadence.as_str())]
    )
    .increment(created as u64);
    ctx.logs
        .info(
            None,
            None,
            &format!("Scheduled {} {} backup jobs", created, cadence),
        )
        .await;

    Ok(created)
}

/// `INSERT … ON CONFLICT DO NOTHING`: exactly one scheduler replica wins
/// each (cadence, bucket) pair.
async fn acquire_lease(
    pool: &PgPool,
    cadence: Cadence,
    bucket_start: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query(
        "INSERT INTO schedule_leases (cadence, bucket_start) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(cadence)
    .bind(bucket_start)
    .execute(pool)
    .await
    .map_err(|error| DatabaseError::query("INSERT", error))?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use pgvault_common::queue::{BackupPayload, Job};
    use pgvault_common::types::{BackupStatus, JobStatus, JobType};
    use sqlx::PgPool;

    #[test]
    fn triggers_fire_at_the_specified_boundaries() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 12, 30, 0).unwrap(); // a Tuesday

        let hourly = schedule_for(Cadence::Hourly).after(&now).next().unwrap();
        assert_eq!((hourly.hour(), hourly.minute(), hourly.second()), (13, 0, 0));

        let daily = schedule_for(Cadence::Daily).after(&now).next().unwrap();
        assert_eq!((daily.day(), daily.hour()), (5, 2));

        let weekly = schedule_for(Cadence::Weekly).after(&now).next().unwrap();
        assert_eq!(weekly.weekday(), Weekday::Sun);
        assert_eq!(weekly.hour(), 3);

        let monthly = schedule_for(Cadence::Monthly).after(&now).next().unwrap();
        assert_eq!((monthly.month(), monthly.day(), monthly.hour()), (4, 1, 4));
    }

    #[test]
    fn next_trigger_picks_the_earliest_cadence() {
        // 01:59:59 — the 02:00:00 hourly and daily fires coincide in one
        // second; hourly wins the tie but both are that instant.
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 1, 59, 59).unwrap();
        let (_, at) = next_trigger(now);
        assert_eq!(at, Utc.with_ymd_and_hms(2025, 3, 4, 2, 0, 0).unwrap());
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn tick_fans_out_over_enabled_instances_and_databases(db: PgPool) {
        let ctx = testutil::context(db.clone());
        testutil::seed_instance(&db, "a", true, &["d1", "d2"]).await;
        testutil::seed_instance(&db, "b", true, &["d1"]).await;
        testutil::seed_instance(&db, "c", false, &["d1"]).await;

        let bucket = Utc.with_ymd_and_hms(2025, 3, 4, 13, 0, 0).unwrap();
        let created = tick(&ctx, Cadence::Hourly, bucket).await.unwrap();
        assert_eq!(created, 3);

        let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at ASC")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 3);

        let backups = backup::list(&db, None, 100).await.unwrap();
        assert_eq!(backups.len(), 3);

        for job in &jobs {
            assert_eq!(job.job_type, JobType::Backup);
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.priority, SCHEDULED_BACKUP_PRIORITY);
            assert_eq!(job.max_retries, 3);

            let payload: BackupPayload = job.parse_payload().unwrap();
            assert_eq!(payload.cadence, Cadence::Hourly);
            assert_ne!(payload.instance_id, "c");

            // Each job references an existing pending backup, and that
            // backup points back at the job.
            let record = backups
                .iter()
                .find(|b| Some(b.id) == payload.backup_id)
                .expect("job payload references a backup row");
            assert_eq!(record.status, BackupStatus::Pending);
            assert_eq!(record.job_id, Some(job.id));
            assert_eq!(record.instance_id, payload.instance_id);
            assert_eq!(record.database_name, payload.database);
        }

        let pairs: Vec<(String, String)> = backups
            .iter()
            .map(|b| (b.instance_id.clone(), b.database_name.clone()))
            .collect();
        assert!(pairs.contains(&("a".to_owned(), "d1".to_owned())));
        assert!(pairs.contains(&("a".to_owned(), "d2".to_owned())));
        assert!(pairs.contains(&("b".to_owned(), "d1".to_owned())));
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn duplicate_ticks_for_one_bucket_are_noops(db: PgPool) {
        let ctx = testutil::context(db.clone());
        testutil::seed_instance(&db, "a", true, &["d1"]).await;

        let bucket = Utc.with_ymd_and_hms(2025, 3, 4, 13, 0, 0).unwrap();
        assert_eq!(tick(&ctx, Cadence::Hourly, bucket).await.unwrap(), 1);
        // A second replica firing the same bucket creates nothing.
        assert_eq!(tick(&ctx, Cadence::Hourly, bucket).await.unwrap(), 0);
        // The next bucket fires normally.
        let next_bucket = Utc.with_ymd_and_hms(2025, 3, 4, 14, 0, 0).unwrap();
        assert_eq!(tick(&ctx, Cadence::Hourly, next_bucket).await.unwrap(), 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn disabled_instances_yield_zero_jobs(db: PgPool) {
        let ctx = testutil::context(db.clone());
        testutil::seed_instance(&db, "c", false, &["d1", "d2"]).await;

        let bucket = Utc.with_ymd_and_hms(2025, 3, 4, 13, 0, 0).unwrap();
        assert_eq!(tick(&ctx, Cadence::Hourly, bucket).await.unwrap(), 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
