//! Persistence interfaces and implementations for the request registry.
use crate::error::Error;
use crate::request::{Request, RequestId};
use async_trait::async_trait;
use bitcoin::Txid;

/// Outcome of the `Pending -> Satisfied` compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The request transitioned to `Satisfied` just now.
    Satisfied,
    /// The request was already `Satisfied`; nothing changed. A no-op signal,
    /// not an error — scanners rely on it to deduplicate re-deliveries.
    AlreadySatisfied,
}

/// Durable keyed registry of watch requests.
///
/// `mark_satisfied` is the only mutation after insert and must be atomic
/// per-id; it is the single serialization point of the whole engine.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new request.
    ///
    /// # Errors
    /// `DuplicateId` if the id is already registered; the existing record is
    /// left untouched.
    async fn put(&self, request: Request) -> Result<(), Error>;

    /// Fetch one request by id, or `NotFound`.
    async fn get(&self, id: &RequestId) -> Result<Request, Error>;

    /// All `Pending` requests, in registration order. Safe to call while a
    /// scan is in progress.
    async fn list_pending(&self) -> Result<Vec<Request>, Error>;

    /// Requests eligible for a rescan starting at `from_height`: everything
    /// `Pending`, plus requests satisfied at `from_height` or later (or with
    /// no recorded height yet, i.e. mempool-only). Requests satisfied
    /// strictly below `from_height` are excluded. Registration order.
    async fn list_rescan(&self, from_height: u32) -> Result<Vec<Request>, Error>;

    /// Atomic compare-and-set `Pending -> Satisfied`, recording the
    /// satisfying transaction. Returns [`MarkOutcome::AlreadySatisfied`]
    /// without modifying anything when the request is no longer `Pending`.
    ///
    /// # Errors
    /// `NotFound` if the id is unknown.
    async fn mark_satisfied(
        &self,
        id: &RequestId,
        txid: Txid,
        height: Option<u32>,
    ) -> Result<MarkOutcome, Error>;
}

// submodules / concrete stores live here
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
