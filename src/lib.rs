#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! vigia: a watch-request registry and matching engine for Bitcoin relays.
//!
//! ## What you implement
//! - [`ChainSource`]: hand over the chain tip and blocks by height.
//! - [`RequestStore`]: keep the request records (or use [`SqliteStore`]).
//!
//! ## What the engine does
//! - Registers **requests**: "pays at least V to script S" or "spends
//!   outpoint O", validated into an explicit two-variant target.
//! - Scans mempool transactions and confirmed blocks against the pending
//!   set and publishes **Match Events** on a broadcast channel, exactly once
//!   per satisfaction (duplicate deliveries are deduplicated through an
//!   atomic `Pending -> Satisfied` compare-and-set).
//! - **Rescans** from a historical height, replaying blocks in order and
//!   re-emitting the same events deterministically so clients can recover a
//!   missed stream.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use vigia::prelude::*;
//! use vigia::request::RequestParams;
//! use async_trait::async_trait;
//! use bitcoin::Block;
//!
//! // --- Your chain collaborator ---
//! struct MyChain;
//! #[async_trait]
//! impl ChainSource for MyChain {
//!     async fn tip_height(&self) -> anyhow::Result<u32> { Ok(0) }
//!     async fn block_at_height(&self, _h: u32) -> anyhow::Result<Block> {
//!         anyhow::bail!("no blocks yet")
//!     }
//! }
//!
//! // --- Wire it up ---
//! async fn run() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("requests.db")?;
//!     let engine = Vigia::new(store, MyChain);
//!
//!     let mut events = engine.subscribe();
//!
//!     engine.register_request(RequestParams {
//!         id: "00".repeat(32),
//!         address: "client-tag".into(),
//!         value: 100_000_000,
//!         pays: Some("76a914c22a601f8a1f4cc20bdc595447b6aeaf4b6cd31288ac".into()),
//!         spends: None,
//!     }).await?;
//!
//!     // feed blocks as they confirm:
//!     // engine.scan_block(height, &block).await?;
//!     // replay history on demand:
//!     // engine.rescan(100).await?;
//!
//!     while let Some(ev) = events.recv().await {
//!         println!("satisfied: {} via {}", ev.request_id, ev.matched_via);
//!     }
//!     Ok(())
//! }
//! ```
/// Engine that registers requests, scans transactions, and replays history.
pub mod engine;

/// Chain data collaborator trait (tip height, blocks by height).
pub mod chain;

/// Match Event publish/subscribe channel.
pub mod emitter;

/// Request records, targets, and Match Events.
pub mod request;

/// Error taxonomy.
pub mod error;

// Internal helpers:
mod matcher;

/// Persistence layer (traits and SQLite implementation).
pub mod store;

// Public re-exports
pub use chain::ChainSource;
pub use engine::Vigia;
pub use error::Error;
pub use request::{MatchEvent, MatchedVia, Request, RequestId, RequestParams};
#[cfg(feature = "store-sqlite")]
pub use store::sqlite_store::SqliteStore;
pub use store::{MarkOutcome, RequestStore};

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{ChainSource, Error, MatchEvent, RequestStore, Vigia};
    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteStore;
}
