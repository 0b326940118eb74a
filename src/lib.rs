//! Client-side cache and normalization layer for REST resources.
//!
//! Responses from a HAL-style JSON API are broken into individual
//! resources, deduplicated by identity, and kept in an immutable
//! normalized [`Store`]. Reads consult the cache first and coalesce onto
//! in-flight round trips; every state transition is a replayable
//! [`Action`] applied by a pure reducer. Consumers read results back as
//! cycle-safe denormalized views.
//!
//! The concrete API plugs in through the [`Adapter`] trait;
//! [`adapters::HttpAdapter`] covers plain HTTP+JSON endpoints.

pub mod action;
pub mod adapter;
pub mod adapters;
pub mod client;
pub mod config;
pub mod denormalize;
pub mod gate;
pub mod indexer;
pub mod links;
pub mod reducer;
pub mod select;
pub mod store;

mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use action::{Action, ActionMeta};
pub use adapter::{Adapter, ApiResponse, LinkRef, Operation, Pagination, Route};
pub use client::Client;
pub use config::Settings;
pub use denormalize::{denormalize, Denormalized, EmbeddedView, Memo};
pub use error::{ApiError, Error};
pub use select::{select_request, select_request_raw, RawRequestView, RequestRef, RequestView};
pub use store::{Link, LocalId, ResourceRecord, Status, Store};
