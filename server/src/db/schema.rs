//! Idempotent schema bootstrap.

use super::gateway::{Gateway, GatewayError};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_clinical_records.sql");

/// Serializes concurrent bootstraps of the same database.
const SCHEMA_LOCK_KEY: i64 = 0x636c_696e_6963;

/// Splits a SQL file into its statements, dropping comment-only chunks.
pub fn statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|chunk| {
            chunk
                .lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
        })
        .collect()
}

/// Creates any missing tables and indexes.
pub async fn apply(gateway: &Gateway) -> Result<usize, GatewayError> {
    let statements = statements(SCHEMA_SQL);
    let mut uow = gateway.begin("schema.apply").await?;

    let result = async {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(uow.conn())
            .await?;
        for statement in &statements {
            sqlx::query(statement).execute(uow.conn()).await?;
        }
        Ok::<_, sqlx::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            uow.commit().await?;
            tracing::info!(statements = statements.len(), "✓ Schema applied");
            Ok(statements.len())
        }
        Err(e) => {
            uow.rollback().await;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_skip_comments_and_trailing_whitespace() {
        let sql = "-- header\n-- more\nCREATE TABLE a (id INT);\n\n-- only a comment;\nCREATE INDEX b ON a (id);\n";
        let parsed = statements(sql);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].ends_with("CREATE TABLE a (id INT)"));
        assert_eq!(parsed[1], "CREATE INDEX b ON a (id)");
    }

    #[test]
    fn test_bundled_schema_creates_every_table() {
        let parsed = statements(SCHEMA_SQL);
        for table in ["users", "patients", "encounters", "diagnoses", "prescriptions"] {
            let create = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(
                parsed.iter().any(|s| s.contains(&create)),
                "missing table {table}"
            );
        }
    }
}
