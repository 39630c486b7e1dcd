//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// Tables are schemaless: job status is a tagged object whose fields depend
/// on the variant, and SCHEMAFULL objects would drop the undeclared ones.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(BATCH_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

-- Status lookups and compare-and-set filter on status.status
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status.status;
DEFINE INDEX IF NOT EXISTS job_batch ON job FIELDS batch_id;
DEFINE INDEX IF NOT EXISTS job_owner ON job FIELDS owner_id;
DEFINE INDEX IF NOT EXISTS job_submitted ON job FIELDS submitted_at;
"#;

/// Batch table schema.
const BATCH_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS batch SCHEMALESS;

DEFINE INDEX IF NOT EXISTS batch_owner ON batch FIELDS owner_id;
DEFINE INDEX IF NOT EXISTS batch_created ON batch FIELDS created_at;
"#;
