use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::DatabaseError;
use crate::types::SslMode;

/// A registered PostgreSQL server. Owned by the admin surface; workers only
/// ever read these rows.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub databases: Vec<String>,
    pub enabled: bool,
    pub ssl_mode: SslMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn create(pool: &PgPool, instance: &Instance) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
INSERT INTO instances (id, name, host, port, username, password, databases, enabled, ssl_mode, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
        "#,
    )
    .bind(&instance.id)
    .bind(&instance.name)
    .bind(&instance.host)
    .bind(instance.port)
    .bind(&instance.username)
    .bind(&instance.password)
    .bind(&instance.databases)
    .bind(instance.enabled)
    .bind(instance.ssl_mode)
    .execute(pool)
    .await
    .map_err(|error| DatabaseError::query("INSERT", error))?;

    Ok(())
}

pub async fn get(pool: &PgPool, id: &str) -> Result<Option<Instance>, DatabaseError> {
    sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|error| DatabaseError::query("SELECT", error))
}

pub async fn list(pool: &PgPool) -> Result<Vec<Instance>, DatabaseError> {
    sqlx::query_as::<_, Instance>("SELECT * FROM instances ORDER BY created_at ASC")
        .fetch_all(pool)
        .await
        .map_err(|error| DatabaseError::query("SELECT", error))
}

/// The scheduler's fan-out set. Disabled instances never produce jobs.
pub async fn list_enabled(pool: &PgPool) -> Result<Vec<Instance>, DatabaseError> {
    sqlx::query_as::<_, Instance>(
        "SELECT * FROM instances WHERE enabled ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(|error| DatabaseError::query("SELECT", error))
}

/// Optional-field update; absent fields keep their current value.
#[derive(Debug, Default, Clone)]
pub struct InstanceUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub databases: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub ssl_mode: Option<SslMode>,
}

pub async fn update(
    pool: &PgPool,
    id: &str,
    update: &InstanceUpdate,
) -> Result<Option<Instance>, DatabaseError> {
    sqlx::query_as::<_, Instance>(
        r#"
UPDATE instances
SET
    name = COALESCE($2, name),
    host = COALESCE($3, host),
    port = COALESCE($4, port),
    username = COALESCE($5, username),
    password = COALESCE($6, password),
    databases = COALESCE($7, databases),
    enabled = COALESCE($8, enabled),
    ssl_mode = COALESCE($9, ssl_mode),
    updated_at = NOW()
WHERE id = $1
RETURNING *
        "#,
    )
    .bind(id)
    .bind(&update.name)
    .bind(&update.host)
    .bind(update.port)
    .bind(&update.username)
    .bind(&update.password)
    .bind(&update.databases)
    .bind(update.enabled)
    .bind(update.ssl_mode)
    .fetch_optional(pool)
    .await
    .map_err(|error| DatabaseError::query("UPDATE", error))
}

/// Deletes the instance; backups cascade at the schema level.
pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, DatabaseError> {
    let result = sqlx::query("DELETE FROM instances WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|error| DatabaseError::query("DELETE", error))?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_instance(id: &str, enabled: bool) -> Instance {
        Instance {
            id: id.to_owned(),
            name: format!("instance {}", id),
            host: "db.internal".to_owned(),
            port: 5432,
            username: "postgres".to_owned(),
            password: "hunter2".to_owned(),
            databases: vec!["app".to_owned()],
            enabled,
            ssl_mode: SslMode::Prefer,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_get_and_delete_round_trip(db: PgPool) {
        let instance = sample_instance("pg1", true);
        create(&db, &instance).await.expect("failed to create");

        let fetched = get(&db, "pg1").await.unwrap().expect("instance missing");
        assert_eq!(fetched.name, instance.name);
        assert_eq!(fetched.databases, vec!["app".to_owned()]);
        assert_eq!(fetched.ssl_mode, SslMode::Prefer);

        assert!(delete(&db, "pg1").await.unwrap());
        assert!(get(&db, "pg1").await.unwrap().is_none());
        assert!(!delete(&db, "pg1").await.unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn list_enabled_skips_disabled_instances(db: PgPool) {
        create(&db, &sample_instance("a", true)).await.unwrap();
        create(&db, &sample_instance("b", false)).await.unwrap();

        let enabled = list_enabled(&db).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "a");

        assert_eq!(list(&db).await.unwrap().len(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn update_touches_only_provided_fields(db: PgPool) {
        create(&db, &sample_instance("pg1", true)).await.unwrap();

        let updated = update(
            &db,
            "pg1",
            &InstanceUpdate {
                enabled: Some(false),
                databases: Some(vec!["app".to_owned(), "analytics".to_owned()]),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("instance missing");

        assert!(!updated.enabled);
        assert_eq!(updated.databases.len(), 2);
        assert_eq!(updated.host, "db.internal");

        let missing_id = Uuid::now_v7().to_string();
        assert!(update(&db, &missing_id, &InstanceUpdate::default())
            .await
            .unwrap()
            .is_none());
    }
}
