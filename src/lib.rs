//! Event-sourced aggregate persistence.
//!
//! An aggregate's state is derived by folding its event stream. This crate provides:
//!
//! - an aggregate core ([`Aggregate`], [`AggregateState`]) that folds events through an
//!   explicit handler table and queues uncommitted mutations;
//! - an [`store::EventStore`] contract with per-stream optimistic concurrency, plus a
//!   Postgres implementation ([`store::postgres::PgStore`]) and an in-memory one
//!   ([`store::memory::InMemoryStore`]);
//! - a [`repository::Repository`] contract translating aggregate mutations into stream
//!   appends and replays, with free helper functions and a tracing decorator;
//! - a [`publisher::CommitPublisher`] forwarding committed events to a message bus in
//!   commit order, checkpointing through a [`publisher::FeedController`].

mod aggregate;
mod event;
mod metadata;
mod state;

pub mod bus;
pub mod publisher;
pub mod repository;
#[cfg(feature = "postgres")]
pub mod sql;
pub mod store;

pub mod types {
    /// 1-based, per-stream event slot. A stream's current version is the version of its
    /// last event, or 0 if the stream is absent.
    pub type Version = i64;
    /// Monotonically increasing marker into the cross-stream change feed.
    pub type Position = i64;
}

#[cfg(feature = "sql")]
pub use sqlx;

pub use crate::aggregate::{Aggregate, DispatchError, Handler, HandlerRegistry, HandlerTable};
pub use crate::event::{Event, EventDescriptor};
pub use crate::metadata::Metadata;
pub use crate::state::AggregateState;
pub use crate::store::StoreEvent;
