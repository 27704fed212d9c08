//! Crate error taxonomy.
//!
//! `AlreadySatisfied` is deliberately absent: a compare-and-set that finds the
//! request already satisfied is a no-op signal ([`crate::store::MarkOutcome`]),
//! not a failure.
use crate::request::RequestId;
use bitcoin::Txid;
use thiserror::Error;

/// Errors surfaced by the registry, store, and scanners.
#[derive(Debug, Error)]
pub enum Error {
    /// A request with this id is already registered; the original is unchanged.
    #[error("duplicate request id {0}")]
    DuplicateId(RequestId),

    /// The registration body is malformed (bad id/script hex, negative value,
    /// or both/neither of pays and spends set).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No request with the given id.
    #[error("request not found")]
    NotFound,

    /// Rescan start height is beyond the chain tip.
    #[error("rescan height {height} above chain tip {tip}")]
    InvalidHeight {
        /// Requested start height.
        height: u32,
        /// Chain tip at the time of the call.
        tip: u32,
    },

    /// One or more transactions failed while scanning a block. Scanning of the
    /// remaining transactions in the block was not aborted.
    #[error("{} transaction(s) failed while scanning block at height {height}", .failures.len())]
    BlockScan {
        /// Height of the block that was being scanned.
        height: u32,
        /// The failing transactions with their error messages.
        failures: Vec<(Txid, String)>,
    },

    /// Store or chain-collaborator failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[cfg(feature = "store-sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Backend(anyhow::Error::new(e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Backend(anyhow::Error::new(e))
    }
}
