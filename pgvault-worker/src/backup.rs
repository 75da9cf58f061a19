//! The backup pipeline: pg_dump → object-store upload → durable record.

use chrono::Utc;
use pgvault_common::layout;
use pgvault_common::models::{backup, instance, Backup};
use pgvault_common::queue::{BackupPayload, Job};
use tracing::{info, warn};

use crate::context::AppContext;
use crate::error::WorkerError;
use crate::tools;

pub async fn handle_backup(ctx: &AppContext, job: &Job) -> Result<(), WorkerError> {
    let payload: BackupPayload = job.parse_payload()?;
    let job_id = Some(job.id);

    // Resolve the backup row: reuse the one the payload names (a retry or a
    // scheduler-created job), otherwise create it now.
    let record = match payload.backup_id {
        Some(id) => backup::get(&ctx.db, id)
            .await?
            .ok_or_else(|| WorkerError::backup_not_found(id))?,
        None => {
            backup::create(&ctx.db, &payload.instance_id, &payload.database, payload.cadence)
                .await?
        }
    };
    backup::set_job_id(&ctx.db, record.id, job.id).await?;
    let backup_id = Some(record.id);

    backup::mark_in_progress(&ctx.db, record.id).await?;
    ctx.logs
        .info(
            job_id,
            backup_id,
            &format!(
                "Starting backup of {} on instance {}",
                payload.database, payload.instance_id
            ),
        )
        .await;

    match run_pipeline(ctx, job, &payload, &record).await {
        Ok(()) => {
            ctx.logs
                .info(job_id, backup_id, "Backup completed successfully")
                .await;
            Ok(())
        }
        Err(e) => {
            // The backup row carries the failure; the dispatcher handles the
            // job row and retry accounting.
            backup::mark_failed(&ctx.db, record.id, &e.to_string()).await?;
            ctx.logs
                .error(job_id, backup_id, "Backup failed", Some(&e.to_string()))
                .await;
            Err(e)
        }
    }
}

async fn run_pipeline(
    ctx: &AppContext,
    job: &Job,
    payload: &BackupPayload,
    record: &Backup,
) -> Result<(), WorkerError> {
    let job_id = Some(job.id);
    let backup_id = Some(record.id);

    // Instances change rarely but credentials matter: always read fresh.
    let instance = instance::get(&ctx.db, &payload.instance_id)
        .await?
        .ok_or_else(|| WorkerError::instance_not_found(&payload.instance_id))?;

    tokio::fs::create_dir_all(&ctx.temp_dir).await.map_err(|e| {
        WorkerError::Fs(format!(
            "failed to create temp dir {}: {}",
            ctx.temp_dir.display(),
            e
        ))
    })?;

    let started = Utc::now();
    let filename = layout::dump_filename(&instance.name, &payload.database, payload.cadence, started);
    let local_path = ctx.temp_dir.join(&filename);

    if let Some(version) = &ctx.dump_tool_version {
        info!("dumping {} with {}", payload.database, version);
    }
    ctx.logs
        .info(
            job_id,
            backup_id,
            &format!("Running pg_dump into {}", local_path.display()),
        )
        .await;

    let command = tools::pg_dump_command(&instance, &payload.database, &local_path);
    let output = tools::run_capturing(command)
        .await
        .map_err(|e| WorkerError::Dump(format!("pg_dump failed to start: {}", e)))?;

    if !output.success {
        return Err(WorkerError::Dump(format!(
            "pg_dump failed: {}\nOutput: {}",
            output.status, output.combined
        )));
    }

    let metadata = tokio::fs::metadata(&local_path)
        .await
        .map_err(|_| WorkerError::Fs("failed to get file info".to_owned()))?;
    let file_size = metadata.len() as i64;
    backup::set_local_file(&ctx.db, record.id, &local_path.to_string_lossy(), file_size).await?;

    let object_key = layout::object_key(&instance.id, payload.cadence, started, &filename);
    ctx.logs
        .info(
            job_id,
            backup_id,
            &format!("Uploading {} bytes to {}", file_size, object_key),
        )
        .await;
    ctx.store.put_file(&object_key, &local_path).await?;

    // Best-effort local cleanup; the artifact of record is remote now.
    if let Err(e) = tokio::fs::remove_file(&local_path).await {
        warn!("failed to delete local dump {}: {}", local_path.display(), e);
        ctx.logs
            .warn(
                job_id,
                backup_id,
                &format!("Failed to delete local dump file: {}", e),
            )
            .await;
    }

    backup::mark_completed(&ctx.db, record.id, &object_key, file_size).await?;

    metrics::counter!("pgvault_backups_completed_total").increment(1);
    metrics::histogram!("pgvault_backup_bytes").record(file_size as f64);

    // Schedule retention for this (instance, cadence); manual backups are
    // exempt. The trim rides the same queue at low priority.
    if ctx.config.retention.keep_count(payload.cadence).is_some() {
        if let Err(e) = ctx
            .queue
            .add_cleanup_job(&instance.id, payload.cadence)
            .await
        {
            // QueueFull still persisted the row; anything else is only a
            // missed trim, never a backup failure.
            warn!("failed to schedule cleanup for {}: {}", instance.id, e);
        }
    }

    Ok(())
}
