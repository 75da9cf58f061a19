//! Artifact naming and object-store layout.
//!
//! Keys embed the creation timestamp so that lexicographic ordering within
//! one (instance, cadence) prefix is chronological; retention depends on
//! exactly that property.

use chrono::{DateTime, Datelike, Utc};

use crate::types::Cadence;

/// Local dump filename: `{instance}_{database}_{cadence}_{YYYY-MM-DD-HH-MM-SS}.sql`
/// with whitespace replaced by underscores.
pub fn dump_filename(
    instance_name: &str,
    database: &str,
    cadence: Cadence,
    at: DateTime<Utc>,
) -> String {
    let name = format!(
        "{}_{}_{}_{}.sql",
        instance_name,
        database,
        cadence,
        at.format("%Y-%m-%d-%H-%M-%S")
    );
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Object key: `backups/{instance_id}/{cadence}/{YYYY}/{MM}/{filename}`.
pub fn object_key(
    instance_id: &str,
    cadence: Cadence,
    at: DateTime<Utc>,
    filename: &str,
) -> String {
    format!(
        "backups/{}/{}/{:04}/{:02}/{}",
        instance_id,
        cadence,
        at.year(),
        at.month(),
        filename
    )
}

/// The listing prefix retention trims under.
pub fn cadence_prefix(instance_id: &str, cadence: Cadence) -> String {
    format!("backups/{}/{}/", instance_id, cadence)
}
