pub use builder::PgStoreBuilder;
pub use event_store::PgStore;

mod builder;
mod event_store;

use crate::store::VersionConflict;

#[derive(Debug, thiserror::Error)]
pub enum PgStoreError {
    /// Sql error
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// Serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// An append's version precondition did not hold.
    #[error(transparent)]
    Conflict(#[from] VersionConflict),
}
