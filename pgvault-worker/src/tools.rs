//! External tool invocation.
//!
//! `pg_dump` and `psql` are spawned directly with an argument vector; no
//! user-supplied string ever reaches a shell. Credentials travel through the
//! child's environment (`PGPASSWORD`), never the command line.

use std::path::Path;
use std::process::Stdio;

use pgvault_common::models::Instance;
use tokio::process::Command;

/// Everything captured from one tool run.
pub struct ToolOutput {
    pub success: bool,
    pub status: String,
    /// Combined stdout + stderr.
    pub combined: String,
}

pub fn pg_dump_command(instance: &Instance, database: &str, output_path: &Path) -> Command {
    let mut command = Command::new("pg_dump");
    command
        .arg("-h")
        .arg(&instance.host)
        .arg("-p")
        .arg(instance.port.to_string())
        .arg("-U")
        .arg(&instance.username)
        .arg("-d")
        .arg(database)
        .arg("-f")
        .arg(output_path)
        .arg("--verbose")
        .env("PGPASSWORD", &instance.password)
        .env("PGSSLMODE", instance.ssl_mode.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

pub fn psql_command(instance: &Instance, database: &str, input_path: &Path) -> Command {
    let mut command = Command::new("psql");
    command
        .arg("-h")
        .arg(&instance.host)
        .arg("-p")
        .arg(instance.port.to_string())
        .arg("-U")
        .arg(&instance.username)
        .arg("-d")
        .arg(database)
        .arg("-f")
        .arg(input_path)
        .arg("-q")
        .env("PGPASSWORD", &instance.password)
        .env("PGSSLMODE", instance.ssl_mode.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// Run the command to completion, capturing exit status and combined output.
pub async fn run_capturing(mut command: Command) -> std::io::Result<ToolOutput> {
    let output = command.output().await?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ToolOutput {
        success: output.status.success(),
        status: output.status.to_string(),
        combined,
    })
}

/// The version line `pg_dump --version` reports, for the startup and
/// per-dump diagnostics log lines. None when the tool is unavailable.
pub async fn pg_dump_version() -> Option<String> {
    let output = Command::new("pg_dump").arg("--version").output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pgvault_common::types::SslMode;
    use std::ffi::OsStr;

    fn instance() -> Instance {
        Instance {
            id: "pg1".to_owned(),
            name: "pg1".to_owned(),
            host: "db.internal".to_owned(),
            port: 5433,
            username: "backup_role".to_owned(),
            password: "s3cr3t".to_owned(),
            databases: vec!["app".to_owned()],
            enabled: true,
            ssl_mode: SslMode::Require,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn args_of(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn env_of<'a>(command: &'a Command, key: &str) -> Option<&'a OsStr> {
        command
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn pg_dump_uses_an_argument_vector_and_env_password() {
        let instance = instance();
        let command = pg_dump_command(&instance, "app", Path::new("/tmp/out.sql"));

        let args = args_of(&command);
        assert_eq!(
            args,
            vec![
                "-h",
                "db.internal",
                "-p",
                "5433",
                "-U",
                "backup_role",
                "-d",
                "app",
                "-f",
                "/tmp/out.sql",
                "--verbose",
            ]
        );
        // The password must never appear on the command line.
        assert!(!args.iter().any(|a| a.contains("s3cr3t")));
        assert_eq!(env_of(&command, "PGPASSWORD"), Some(OsStr::new("s3cr3t")));
        assert_eq!(env_of(&command, "PGSSLMODE"), Some(OsStr::new("require")));
    }

    #[test]
    fn psql_runs_quiet_against_the_target_database(){
        let instance = instance();
        let command = psql_command(&instance, "app_restored", Path::new("/tmp/in.sql"));

        let args = args_of(&command);
        assert_eq!(command.as_std().get_program(), OsStr::new("psql"));
        assert!(args.contains(&"-q".to_owned()));
        assert!(args.contains(&"app_restored".to_owned()));
        assert!(!args.iter().any(|a| a.contains("s3cr3t")));
        assert_eq!(env_of(&command, "PGPASSWORD"), Some(OsStr::new("s3cr3t")));
    }

    #[tokio::test]
    async fn run_capturing_combines_stdout_and_stderr() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("echo out; echo err 1>&2; exit 3")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = run_capturing(command).await.unwrap();
        assert!(!output.success);
        assert!(output.combined.contains("out"));
        assert!(output.combined.contains("err"));
        assert!(output.status.contains('3'));
    }
}
