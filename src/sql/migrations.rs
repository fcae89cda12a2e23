use sqlx::postgres::PgQueryResult;
use sqlx::{Pool, Postgres, Transaction};

use crate::aggregate::Aggregate;

/// Sets up one aggregate's event table, atomically. Idempotent; meant to run once per
/// store per startup.
pub struct Migrations;

impl Migrations {
    pub async fn run<A>(pool: &Pool<Postgres>, schema: Option<&str>) -> Result<(), sqlx::Error>
    where
        A: Aggregate,
    {
        let table_name: String = match schema {
            Some(schema) => format!("{}.{}_events", schema, A::NAME),
            None => format!("{}_events", A::NAME),
        };
        // Index names are not schema-qualified; derive them from the bare table name.
        let index_prefix: String = format!("{}_events", A::NAME);

        let mut transaction: Transaction<Postgres> = pool.begin().await?;

        let migrations: Vec<String> = vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (\
                 id UUID PRIMARY KEY NOT NULL, \
                 position BIGSERIAL NOT NULL, \
                 aggregate_id UUID NOT NULL, \
                 version BIGINT NOT NULL CHECK (version > 0), \
                 event_type TEXT NOT NULL, \
                 payload JSONB NOT NULL, \
                 metadata JSONB NOT NULL, \
                 occurred_on TIMESTAMPTZ NOT NULL)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {index_prefix}_aggregate_id ON {table_name} (aggregate_id)"),
            // Backs the optimistic-concurrency precondition: no two appends can claim the
            // same version slot of one stream.
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {index_prefix}_aggregate_id_version \
                 ON {table_name} (aggregate_id, version)"
            ),
            format!("CREATE UNIQUE INDEX IF NOT EXISTS {index_prefix}_position ON {table_name} (position)"),
        ];

        for migration in migrations {
            let _: PgQueryResult = sqlx::query(migration.as_str()).execute(&mut *transaction).await?;
        }

        transaction.commit().await
    }
}
