use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::aggregate::Aggregate;
use crate::sql::migrations::Migrations;
use crate::sql::statements::Statements;
use crate::store::postgres::event_store::InnerPgStore;
use crate::store::postgres::PgStore;

/// Struct used to build a brand new [`PgStore`].
pub struct PgStoreBuilder<A>
where
    A: Aggregate,
{
    pool: Pool<Postgres>,
    schema: Option<String>,
    run_migrations: bool,
    _aggregate: PhantomData<A>,
}

impl<A> PgStoreBuilder<A>
where
    A: Aggregate,
{
    /// Creates a new instance of a [`PgStoreBuilder`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            schema: None,
            run_migrations: true,
            _aggregate: PhantomData,
        }
    }

    /// Qualifies the event table with an explicit schema. Without this the table lives in
    /// the connection's default search path.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Calling this function the caller avoids running migrations. It is recommended to
    /// run migrations at least once per store per startup.
    pub fn without_running_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    /// Runs the table migrations unless explicitly disabled, then returns a [`PgStore`].
    ///
    /// # Errors
    ///
    /// Will return an `Err` if running the migrations fails.
    pub async fn try_build(self) -> Result<PgStore<A>, sqlx::Error> {
        if self.run_migrations {
            Migrations::run::<A>(&self.pool, self.schema.as_deref()).await?;
        }

        Ok(PgStore {
            inner: Arc::new(InnerPgStore {
                pool: self.pool,
                statements: Statements::new::<A>(self.schema.as_deref()),
            }),
            _aggregate: PhantomData,
        })
    }
}
