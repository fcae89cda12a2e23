//! Free helper functions composed from the [`Repository`] contract.
//!
//! These are read-modify-write conveniences, not core primitives: they work with any
//! repository implementation, decorated or not.

use uuid::Uuid;

use crate::aggregate::{Aggregate, DispatchError};
use crate::event::Event;
use crate::repository::{Repository, RepositoryError};
use crate::state::AggregateState;
use crate::store::StoreEvent;
use crate::types::Version;

/// Like [`Repository::find`], but a missing stream is an error instead of `None`.
pub async fn get<A, R>(
    repository: &R,
    id: Uuid,
) -> Result<AggregateState<A>, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    repository.find(id).await?.ok_or(RepositoryError::NotFound(id))
}

/// Like [`Repository::get_by_id`], but a missing stream is an error instead of `None`.
pub async fn get_by_id_or_err<A, R>(
    repository: &R,
    id: Uuid,
) -> Result<AggregateState<A>, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    repository.get_by_id(id).await?.ok_or(RepositoryError::NotFound(id))
}

/// Loads the aggregate, applies `mutate` in place and persists the raised events.
pub async fn get_and_update<A, R, F>(
    repository: &R,
    id: Uuid,
    mutate: F,
    expected_version: Option<Version>,
) -> Result<Version, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
    F: FnOnce(&mut AggregateState<A>) -> Result<(), DispatchError> + Send,
{
    let mut state: AggregateState<A> = get(repository, id).await?;

    mutate(&mut state)?;

    repository.update(id, &mut state, expected_version).await
}

pub async fn exists<A, R>(repository: &R, id: Uuid) -> Result<bool, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    repository.stream_exists(id).await
}

/// Replays the stream at `version`, collapsing *all* errors to `None`.
///
/// This is the one deliberately lossy helper in the crate, for defensive call sites that
/// treat "could not reconstruct" and "does not exist" the same way. Everything else
/// propagates errors.
pub async fn get_at_version_safe<A, R>(repository: &R, id: Uuid, version: Version) -> Option<AggregateState<A>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    repository.get_at_version(id, version).await.ok().flatten()
}

pub async fn has_events<A, R>(repository: &R, id: Uuid) -> Result<bool, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    Ok(!repository.get_events(id).await?.is_empty())
}

pub async fn event_count<A, R>(repository: &R, id: Uuid) -> Result<usize, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    Ok(repository.get_events(id).await?.len())
}

/// The stream's events whose type tag equals `event_type`.
pub async fn events_by_type<A, R>(
    repository: &R,
    id: Uuid,
    event_type: &str,
) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    let mut events = repository.get_events(id).await?;
    events.retain(|event| event.payload.event_type() == event_type);
    Ok(events)
}

/// The last `count` events of the stream, oldest first.
pub async fn recent_events<A, R>(
    repository: &R,
    id: Uuid,
    count: usize,
) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<R::StoreError>>
where
    A: Aggregate + 'static,
    R: Repository<A> + ?Sized,
{
    let mut events = repository.get_events(id).await?;
    let skip: usize = events.len().saturating_sub(count);
    Ok(events.split_off(skip))
}
