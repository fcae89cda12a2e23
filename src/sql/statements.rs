use crate::aggregate::Aggregate;

/// Prepared SQL text for one aggregate's event table.
///
/// The table name follows the `{name}_events` convention, optionally qualified by an
/// explicit schema threaded through construction (never read from the environment).
#[derive(Clone, Debug)]
pub struct Statements {
    table_name: String,
    insert: String,
    current_version: String,
    select_by_aggregate_id: String,
    select_from_version: String,
    select_from_timestamp: String,
    select_stream_state: String,
    select_after_position: String,
}

impl Statements {
    pub fn new<A>(schema: Option<&str>) -> Self
    where
        A: Aggregate,
    {
        let table_name: String = match schema {
            Some(schema) => format!("{}.{}_events", schema, A::NAME),
            None => format!("{}_events", A::NAME),
        };

        let columns: &str = "id, aggregate_id, version, event_type, payload, metadata, occurred_on, position";

        Self {
            insert: format!(
                "INSERT INTO {table_name} (id, aggregate_id, version, event_type, payload, metadata, occurred_on) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ),
            current_version: format!(
                "SELECT COALESCE(MAX(version), 0) FROM {table_name} WHERE aggregate_id = $1"
            ),
            select_by_aggregate_id: format!(
                "SELECT {columns} FROM {table_name} WHERE aggregate_id = $1 ORDER BY version"
            ),
            select_from_version: format!(
                "SELECT {columns} FROM {table_name} WHERE aggregate_id = $1 AND version >= $2 ORDER BY version"
            ),
            select_from_timestamp: format!(
                "SELECT {columns} FROM {table_name} WHERE aggregate_id = $1 AND occurred_on >= $2 ORDER BY version"
            ),
            select_stream_state: format!(
                "SELECT MAX(version) AS version, MAX(occurred_on) AS last_modified FROM {table_name} \
                 WHERE aggregate_id = $1"
            ),
            select_after_position: format!(
                "SELECT {columns} FROM {table_name} WHERE position > $1 ORDER BY position LIMIT $2"
            ),
            table_name,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn insert(&self) -> &str {
        &self.insert
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn by_aggregate_id(&self) -> &str {
        &self.select_by_aggregate_id
    }

    pub fn from_version(&self) -> &str {
        &self.select_from_version
    }

    pub fn from_timestamp(&self) -> &str {
        &self.select_from_timestamp
    }

    pub fn stream_state(&self) -> &str {
        &self.select_stream_state
    }

    pub fn after_position(&self) -> &str {
        &self.select_after_position
    }
}
