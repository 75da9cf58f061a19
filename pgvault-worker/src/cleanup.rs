//! Retention: trim old artifacts under one (instance, cadence) prefix.
//!
//! The algorithm depends only on key ordering — keys embed the creation
//! timestamp, so lexicographic order under a prefix is chronological — and
//! never on job completion order.

use pgvault_common::layout;
use pgvault_common::queue::{CleanupPayload, Job};
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::error::WorkerError;

/// The oldest keys in excess of `keep`. `keys` must be sorted ascending,
/// which the store's listing guarantees.
pub fn keys_to_delete(keys: &[String], keep: usize) -> &[String] {
    if keys.len() <= keep {
        &[]
    } else {
        &keys[..keys.len() - keep]
    }
}

pub async fn handle_cleanup(ctx: &AppContext, job: &Job) -> Result<(), WorkerError> {
    let payload: CleanupPayload = job.parse_payload()?;
    let job_id = Some(job.id);

    let Some(keep) = ctx.config.retention.keep_count(payload.cadence) else {
        // Manual backups are exempt from retention.
        return Ok(());
    };

    let prefix = layout::cadence_prefix(&payload.instance_id, payload.cadence);
    let keys = ctx.store.list(&prefix).await?;

    let excess = keys_to_delete(&keys, keep as usize);
    if excess.is_empty() {
        debug!(
            "retention for {} keeps {} of {} objects, nothing to trim",
            prefix,
            keep,
            keys.len()
        );
        return Ok(());
    }

    let mut failed = 0usize;
    for key in excess {
        if let Err(e) = ctx.store.delete(key).await {
            // Individual delete failures never abort the trim; the object
            // stays for the next cleanup pass.
            failed += 1;
            warn!("failed to delete {}: {}", key, e);
            ctx.logs
                .warn(job_id, None, &format!("Failed to delete {}: {}", key, e))
                .await;
        }
    }

    let deleted = excess.len() - failed;
    metrics::counter!("pgvault_retention_objects_deleted_total").increment(deleted as u64);
    ctx.logs
        .info(
            job_id,
            None,
            &format!(
                "Retention trimmed {} of {} objects under {} (keep {})",
                deleted,
                keys.len(),
                prefix,
                keep
            ),
        )
        .await;

    if failed > 0 {
        ctx.logs
            .warn(
                job_id,
                None,
                &format!(
                    "Retention could not delete {} of {} excess objects under {}",
                    failed,
                    excess.len(),
                    prefix
                ),
            )
            .await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, MemoryStore};
    use pgvault_common::store::ObjectStore;
    use pgvault_common::types::Cadence;
    use sqlx::PgPool;
    use std::sync::Arc;

    #[test]
    fn keys_to_delete_trims_the_oldest() {
        let keys: Vec<String> = (1..=6)
            .map(|i| format!("backups/pg1/hourly/2025/03/pg1_app_hourly_2025-03-0{}.sql", i))
            .collect();

        let empty: &[String] = &[];
        assert_eq!(keys_to_delete(&keys, 4), &keys[..2]);
        assert_eq!(keys_to_delete(&keys, 6), empty);
        assert_eq!(keys_to_delete(&keys, 10), empty);
        // Retention 0 deletes everything under the prefix.
        assert_eq!(keys_to_delete(&keys, 0), &keys[..]);
        assert_eq!(keys_to_delete(&[], 4), empty);
    }

    fn seed_objects(store: &MemoryStore, cadence: Cadence, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let key = format!(
                    "backups/pg1/{}/2025/03/pg1_app_{}_2025-03-09-0{}-00-00.sql",
                    cadence, cadence, i
                );
                store.insert(&key, b"-- dump".to_vec());
                key
            })
            .collect()
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn keeps_the_newest_objects_under_the_prefix(db: PgPool) {
        let store = Arc::new(MemoryStore::default());
        let ctx = testutil::context_with_store(db.clone(), store.clone());
        let keys = seed_objects(&store, Cadence::Hourly, 6);
        // Objects under other prefixes are untouched.
        store.insert("backups/pg1/manual/2025/03/keepme.sql", b"x".to_vec());

        let job = ctx.queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        // The test retention config keeps 4 hourly objects.
        handle_cleanup(&ctx, &job).await.expect("cleanup failed");

        let remaining = store.list("backups/pg1/hourly/").await.unwrap();
        assert_eq!(remaining, keys[2..].to_vec());
        assert_eq!(store.list("backups/pg1/manual/").await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn rerunning_with_no_excess_is_a_noop(db: PgPool) {
        let store = Arc::new(MemoryStore::default());
        let ctx = testutil::context_with_store(db.clone(), store.clone());
        seed_objects(&store, Cadence::Hourly, 3);

        let job = ctx.queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        handle_cleanup(&ctx, &job).await.unwrap();
        let after_first = store.list("backups/pg1/hourly/").await.unwrap();
        assert_eq!(after_first.len(), 3);

        handle_cleanup(&ctx, &job).await.unwrap();
        assert_eq!(store.list("backups/pg1/hourly/").await.unwrap(), after_first);
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn delete_failures_are_logged_but_do_not_fail_the_job(db: PgPool) {
        let store = Arc::new(MemoryStore::default());
        let ctx = testutil::context_with_store(db.clone(), store.clone());
        let keys = seed_objects(&store, Cadence::Hourly, 6);
        store.fail_deletes_of(&keys[0]);

        let job = ctx.queue.add_cleanup_job("pg1", Cadence::Hourly).await.unwrap();
        handle_cleanup(&ctx, &job).await.expect("cleanup must swallow delete failures");

        let remaining = store.list("backups/pg1/hourly/").await.unwrap();
        // The poisoned object survives; the other excess one is gone.
        assert_eq!(remaining.len(), 5);
        assert!(remaining.contains(&keys[0]));
        assert!(!remaining.contains(&keys[1]));

        let entries = pgvault_common::models::logs::list(&db, Some(job.id), None, 100)
            .await
            .unwrap();
        assert!(entries
            .iter()
            .any(|e| e.message.contains("could not delete 1 of 2")));
    }

    #[sqlx::test(migrations = "../pgvault-common/migrations")]
    async fn manual_cadence_is_exempt(db: PgPool) {
        let store = Arc::new(MemoryStore::default());
        let ctx = testutil::context_with_store(db.clone(), store.clone());
        seed_objects(&store, Cadence::Manual, 6);

        let job = ctx.queue.add_cleanup_job("pg1", Cadence::Manual).await.unwrap();
        handle_cleanup(&ctx, &job).await.unwrap();

        assert_eq!(store.list("backups/pg1/manual/").await.unwrap().len(), 6);
    }
}
