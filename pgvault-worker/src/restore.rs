//! The restore pipeline: download a completed backup's artifact and feed it
//! into `psql` against a target instance.

use std::path::Path;

use chrono::Utc;
use pgvault_common::models::{backup, instance, Instance};
use pgvault_common::queue::{Job, RestorePayload};
use tracing::warn;

use crate::context::AppContext;
use crate::error::WorkerError;
use crate::tools;

pub async fn handle_restore(ctx: &AppContext, job: &Job) -> Result<(), WorkerError> {
    let payload: RestorePayload = job.parse_payload()?;
    let job_id = Some(job.id);

    let record = backup::get(&ctx.db, payload.backup_id)
        .await?
        .ok_or_else(|| WorkerError::backup_not_found(payload.backup_id))?;
    let backup_id = Some(record.id);

    if record.status != pgvault_common::types::BackupStatus::Completed {
        return Err(WorkerError::Restore(format!(
            "backup {} is not completed (status: {})",
            record.id, record.status
        )));
    }
    let object_key = record.object_key.as_deref().ok_or_else(|| {
        WorkerError::Restore(format!("backup {} has no stored artifact", record.id))
    })?;

    let target = instance::get(&ctx.db, &payload.instance_id)
        .await?
        .ok_or_else(|| WorkerError::instance_not_found(&payload.instance_id))?;

    tokio::fs::create_dir_all(&ctx.temp_dir).await.map_err(|e| {
        WorkerError::Fs(format!(
            "failed to create temp dir {}: {}",
            ctx.temp_dir.display(),
            e
        ))
    })?;

    // Fresh path per attempt; the nanosecond stamp keeps concurrent restores
    // of the same backup apart.
    let local_path = ctx.temp_dir.join(format!(
        "restore_{}_{}.sql",
        record.id,
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    ctx.logs
        .info(
            job_id,
            backup_id,
            &format!(
                "Restoring backup {} into {} on instance {}",
                record.id, payload.database, target.id
            ),
        )
        .await;

    let result = download_and_apply(ctx, object_key, &local_path, &target, &payload.database).await;

    // The temp file goes away on every exit path.
    if let Err(e) = tokio::fs::remove_file(&local_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                "failed to delete restore temp file {}: {}",
                local_path.display(),
                e
            );
        }
    }

    match &result {
        Ok(()) => {
            ctx.logs
                .info(job_id, backup_id, "Restore completed successfully")
                .await;
        }
        Err(e) => {
            ctx.logs
                .error(job_id, backup_id, "Restore failed", Some(&e.to_string()))
                .await;
        }
    }

    result
}

async fn download_and_apply(
    ctx: &AppContext,
    object_key: &str,
    local_path: &Path,
    target: &Instance,
    database: &str,
) -> Result<(), WorkerError> {
    ctx.store.get_to_file(object_key, local_path).await?;

    let command = tools::psql_command(target, database, local_path);
    let output = tools::run_capturing(command)
        .await
        .map_err(|e| WorkerError::Restore(format!("psql failed to start: {}", e)))?;

    if !output.success {
        return Err(WorkerError::Restore(format!(
            "psql failed: {}\nOutput: {}",
            output.status, output.combined
        )));
    }

    metrics::counter!("pgvault_restores_completed_total").increment(1);
    Ok(())
}
